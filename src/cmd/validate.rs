use std::path::Path;

use anyhow::Result;

use crate::events::EventStream;
use crate::stack::Stack;

/// Parse and validate the stack file, reporting the result as events.
pub fn cmd_validate(stack_file: &Path) -> Result<()> {
    let stream = EventStream::new(true);
    stream.info(format!("Validating {}...", stack_file.display()));

    match Stack::load(stack_file) {
        Ok(stack) => {
            stream.success(format!(
                "{} is valid: {} target(s), {} service(s)",
                stack_file.display(),
                stack.targets.len(),
                stack.services.len()
            ));
            Ok(())
        }
        Err(e) => {
            stream.error(format!("Validation failed: {e}"));
            Err(e.into())
        }
    }
}
