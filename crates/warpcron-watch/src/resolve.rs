//! Template resolution for a single workflow.

use std::sync::Arc;

use tracing::{error, warn};

use warpcron_core::resource::internal_template_name;
use warpcron_core::{ScheduleSpec, TemplateClient, WorkflowSpec};

/// Collects the full schedule list of a workflow: its own schedules
/// followed by the schedules of each used template, in reference order.
#[derive(Clone)]
pub struct TemplateResolver {
    templates: Arc<dyn TemplateClient>,
    environment_id: String,
}

impl TemplateResolver {
    pub fn new(templates: Arc<dyn TemplateClient>, environment_id: impl Into<String>) -> Self {
        Self {
            templates,
            environment_id: environment_id.into(),
        }
    }

    /// Resolve the schedules of `workflow`.
    ///
    /// `skip` names a template (internal name) to treat as unused. A
    /// template that cannot be fetched is logged and contributes nothing;
    /// the remaining templates still resolve.
    pub async fn resolve(
        &self,
        workflow: &str,
        spec: &WorkflowSpec,
        skip: Option<&str>,
    ) -> Vec<ScheduleSpec> {
        let mut schedules: Vec<ScheduleSpec> = spec.schedules().cloned().collect();

        for reference in &spec.uses {
            let internal = internal_template_name(&reference.name);
            if skip == Some(internal.as_str()) {
                continue;
            }

            match self.templates.get(&self.environment_id, &internal).await {
                Ok(Some(template)) => {
                    if let Some(template_spec) = &template.spec {
                        schedules.extend(template_spec.schedules().cloned());
                    }
                }
                Ok(None) => {
                    warn!(
                        %workflow,
                        template = %reference.name,
                        "template for scheduled workflow not found, ignoring it"
                    );
                }
                Err(e) => {
                    error!(
                        %workflow,
                        template = %reference.name,
                        error = %e,
                        "failed to get template for scheduled workflow, ignoring it"
                    );
                }
            }
        }

        schedules
    }
}
