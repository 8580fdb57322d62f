use std::path::{Path, PathBuf};

use anyhow::Result;

use crate::events::EventStream;
use crate::stack::Stack;
use crate::workflow::Runner;

/// Run the full deployment workflow against the stack file.
///
/// Progress goes to the NDJSON event stream on stdout; the final error (if
/// any) is also emitted there before the non-zero exit propagates.
pub async fn cmd_deploy(stack_file: &Path, project_dir: Option<PathBuf>) -> Result<()> {
    let stream = EventStream::new(true);
    let project_dir = resolve_project_dir(stack_file, project_dir);

    stream.info("Starting deployment workflow...");
    stream.info(format!("Stack file: {}", stack_file.display()));
    stream.info(format!("Project directory: {}", project_dir.display()));

    let stack = match Stack::load(stack_file) {
        Ok(stack) => stack,
        Err(e) => {
            stream.error(format!("Failed to load stack: {e}"));
            return Err(e.into());
        }
    };
    stream.success(format!("Loaded stack: {}", stack.name));

    let runner = match Runner::new(stack, project_dir) {
        Ok(runner) => runner,
        Err(e) => {
            stream.error(format!("Invalid deployment target: {e}"));
            return Err(e.into());
        }
    };

    if let Err(e) = runner.execute(&stream).await {
        stream.error(format!("Deployment failed: {e:#}"));
        return Err(e);
    }

    stream.success("Deployment completed successfully!");
    Ok(())
}

/// The project directory defaults to the stack file's own directory.
fn resolve_project_dir(stack_file: &Path, project_dir: Option<PathBuf>) -> PathBuf {
    match project_dir {
        Some(dir) => dir,
        None => stack_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(".")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_dir_defaults_to_stack_file_parent() {
        let dir = resolve_project_dir(Path::new("/work/demo/stack.yaml"), None);
        assert_eq!(dir, PathBuf::from("/work/demo"));
    }

    #[test]
    fn bare_stack_file_falls_back_to_cwd() {
        let dir = resolve_project_dir(Path::new("stack.yaml"), None);
        assert_eq!(dir, PathBuf::from("."));
    }

    #[test]
    fn explicit_project_dir_wins() {
        let dir = resolve_project_dir(
            Path::new("/work/demo/stack.yaml"),
            Some(PathBuf::from("/elsewhere")),
        );
        assert_eq!(dir, PathBuf::from("/elsewhere"));
    }
}
