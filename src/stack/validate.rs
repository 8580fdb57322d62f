//! Stack validation.
//!
//! All rules are configuration errors: fatal, surfaced immediately, no retry.
//! `dependsOn` cycles are assumed acyclic upstream and not checked here.

use super::Stack;
use crate::errors::StackError;

impl Stack {
    pub fn validate(&self) -> Result<(), StackError> {
        if self.api_version.is_empty() {
            return Err(StackError::MissingApiVersion);
        }
        if self.name.is_empty() {
            return Err(StackError::MissingName);
        }
        if self.targets.is_empty() {
            return Err(StackError::NoTargets);
        }
        if self.services.is_empty() {
            return Err(StackError::NoServices);
        }

        for (name, service) in &self.services {
            if !self.targets.contains_key(&service.target) {
                return Err(StackError::UnknownTarget {
                    service: name.clone(),
                    target: service.target.clone(),
                });
            }
            if service.spec.image.is_empty() && service.spec.build.is_empty() {
                return Err(StackError::MissingImage {
                    service: name.clone(),
                });
            }
            for dep in &service.depends_on {
                if !self.services.contains_key(dep) {
                    return Err(StackError::UnknownDependency {
                        service: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::StackError;
    use crate::stack::Stack;

    #[test]
    fn valid_stack_passes() {
        let stack = crate::stack::test_fixtures::local_stack();
        assert!(stack.validate().is_ok());
    }

    #[test]
    fn rejects_missing_api_version() {
        let yaml = r#"
name: demo
targets:
  local:
    type: docker
services:
  web:
    target: local
    spec:
      image: nginx
"#;
        assert!(matches!(
            Stack::parse(yaml),
            Err(StackError::MissingApiVersion)
        ));
    }

    #[test]
    fn rejects_undefined_target_reference() {
        let yaml = r#"
apiVersion: v1
name: demo
targets:
  local:
    type: docker
services:
  web:
    target: prod
    spec:
      image: nginx
"#;
        match Stack::parse(yaml) {
            Err(StackError::UnknownTarget { service, target }) => {
                assert_eq!(service, "web");
                assert_eq!(target, "prod");
            }
            other => panic!("expected UnknownTarget, got {other:?}"),
        }
    }

    #[test]
    fn rejects_service_without_image_or_build() {
        let yaml = r#"
apiVersion: v1
name: demo
targets:
  local:
    type: docker
services:
  web:
    target: local
    spec:
      ports: ["80"]
"#;
        assert!(matches!(
            Stack::parse(yaml),
            Err(StackError::MissingImage { .. })
        ));
    }

    #[test]
    fn rejects_undefined_dependency() {
        let yaml = r#"
apiVersion: v1
name: demo
targets:
  local:
    type: docker
services:
  web:
    target: local
    spec:
      image: nginx
    dependsOn: [db]
"#;
        match Stack::parse(yaml) {
            Err(StackError::UnknownDependency {
                service,
                dependency,
            }) => {
                assert_eq!(service, "web");
                assert_eq!(dependency, "db");
            }
            other => panic!("expected UnknownDependency, got {other:?}"),
        }
    }

    #[test]
    fn rejects_empty_services() {
        let yaml = r#"
apiVersion: v1
name: demo
targets:
  local:
    type: docker
services: {}
"#;
        assert!(matches!(Stack::parse(yaml), Err(StackError::NoServices)));
    }
}
