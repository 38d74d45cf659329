use std::collections::HashMap;

use serde::Deserialize;

use crate::GatewayConfigError;

/// One backend resource the gateway relays to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceConfig {
    /// Route segment callers use, e.g. `history` in `/api/history`.
    pub name: String,
    /// Path of the collection below the backend base URL.
    pub path: String,
    /// Human-readable name used in fallback error messages.
    #[serde(default)]
    pub label: Option<String>,
    /// Query parameter that narrows a listing to one parent record.
    #[serde(default)]
    pub filter_param: Option<String>,
}

impl ResourceConfig {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            label: None,
            filter_param: None,
        }
    }

    pub fn labelled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn filtered_by(mut self, param: impl Into<String>) -> Self {
        self.filter_param = Some(param.into());
        self
    }

    pub fn label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }

    pub(crate) fn path_segments(&self) -> impl Iterator<Item = &str> {
        self.path.split('/').filter(|segment| !segment.is_empty())
    }
}

/// The medical-record resources exposed by the patients backend.
pub fn default_resources() -> Vec<ResourceConfig> {
    vec![
        ResourceConfig::new("history", "patients/kasallik-tarixi")
            .labelled("medical history")
            .filtered_by("patient_id"),
        ResourceConfig::new("patients", "patients/patientlar").labelled("patient"),
        ResourceConfig::new("appointments", "appointments/appointments")
            .labelled("appointment")
            .filtered_by("patient_id"),
    ]
}

#[derive(Debug, Clone, Default)]
pub struct ResourceRegistry {
    resources: HashMap<String, ResourceConfig>,
}

impl ResourceRegistry {
    pub fn new(resources: Vec<ResourceConfig>) -> Result<Self, GatewayConfigError> {
        let mut registry = HashMap::with_capacity(resources.len());
        for resource in resources {
            if resource.name.trim().is_empty() || resource.path_segments().next().is_none() {
                return Err(GatewayConfigError::InvalidResource(resource.name));
            }
            if registry.contains_key(&resource.name) {
                return Err(GatewayConfigError::DuplicateResource(resource.name));
            }
            registry.insert(resource.name.clone(), resource);
        }
        Ok(Self {
            resources: registry,
        })
    }

    pub fn get(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.get(name)
    }
}
