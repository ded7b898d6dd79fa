use iambroker_cloud::{CloudError, ErrorKind};
use iambroker_core::{BindingCondition, Capability, CapabilityRequest, CustomRoleSpec, RoleBinding};
use serde_json::Value;
use tracing::{debug, info};

use super::Provisioner;
use crate::error::ReconcileResult;

/// What enabling one capability bound.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grant {
    /// Fully-qualified roles bound to the account.
    pub roles: Vec<String>,
    /// Custom roles the bundle depends on (short names).
    pub custom_roles: Vec<String>,
}

impl Provisioner<'_> {
    /// Grant `capability` to the request's service account.
    ///
    /// Custom roles in the bundle are created first if missing. Object
    /// storage grants are narrowed to the request's access patterns.
    pub fn enable_capability(
        &self,
        request: &CapabilityRequest,
        capability: Capability,
        email: &str,
    ) -> ReconcileResult<Grant> {
        let project = self.ctx.project()?;
        let mut grant = Grant::default();

        for spec in capability.custom_roles() {
            self.ensure_custom_role(spec)?;
            grant.custom_roles.push(spec.name.to_string());
        }

        let title = format!("{} {}", request.application_name, capability);
        let condition =
            BindingCondition::for_storage_patterns(&title, request.access_patterns(capability));
        let bindings: Vec<RoleBinding> = capability
            .role_bundle()
            .iter()
            .map(|role| RoleBinding {
                role: role.qualified(project),
                condition: condition.clone(),
            })
            .collect();

        self.bind_all(email, &bindings)?;
        grant.roles = bindings.into_iter().map(|b| b.role).collect();

        info!(
            unit = %request.unit_name,
            capability = %capability,
            roles = grant.roles.len(),
            "enabled capability"
        );
        Ok(grant)
    }

    /// Bind each role to `email`, waiting out propagation of new entities.
    pub fn bind_all(&self, email: &str, bindings: &[RoleBinding]) -> ReconcileResult<()> {
        let project = self.ctx.project()?;
        let member = format!("serviceAccount:{email}");

        for binding in bindings {
            let condition = binding.condition.as_ref().map(BindingCondition::to_flag_value);
            let mut args = vec![
                project,
                "--member",
                member.as_str(),
                "--role",
                binding.role.as_str(),
            ];
            if let Some(condition) = condition.as_deref() {
                args.extend(["--condition", condition]);
            }

            self.retry.run(&format!("bind {}", binding.role), || {
                self.cloud.invoke("projects", "add-iam-policy-binding", &args)
            })?;
            debug!(member = %member, role = %binding.role, conditional = condition.is_some(), "role bound");
        }
        Ok(())
    }

    /// Create a project-scoped custom role unless it already exists.
    ///
    /// Returns whether the role was created by this call.
    pub fn ensure_custom_role(&self, spec: &CustomRoleSpec) -> ReconcileResult<bool> {
        let project = self.ctx.project()?;

        let listed = self
            .cloud
            .invoke("iam", "roles", &["list", "--project", project])?;
        let exists = listed
            .as_array()
            .ok_or_else(|| CloudError::Format {
                command: "iam roles list".to_string(),
                output: listed.to_string(),
            })?
            .iter()
            .filter_map(|role| role.get("name").and_then(Value::as_str))
            .any(|name| name.rsplit('/').next() == Some(spec.name));
        if exists {
            debug!(role = spec.name, "custom role present");
            return Ok(false);
        }

        let permissions = spec.permissions.join(",");
        let created = self.cloud.invoke(
            "iam",
            "roles",
            &[
                "create",
                spec.name,
                "--project",
                project,
                "--title",
                spec.title,
                "--description",
                spec.description,
                "--permissions",
                permissions.as_str(),
            ],
        );
        match created {
            Ok(_) => {
                info!(role = spec.name, project, "created custom role");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                debug!(role = spec.name, "custom role created concurrently");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}
