//! Automation registry: the single source of truth for which automations
//! exist and which are enabled.
//!
//! Loaded once at startup from persisted settings. Settings are matched to
//! implementations by name; kinds that have no row yet get a default
//! (enabled) row.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{info, warn};

use super::automation::Automation;
use super::models::AutomationSettings;
use crate::common::AutomationId;
use crate::config::RegistryLoadConfig;
use crate::kernel::BaseAutomationSettingsStore;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("automation settings unavailable after {attempts} attempts: {source}")]
    LoadFailed {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("automation {0} not found")]
    UnknownAutomation(AutomationId),

    #[error("automation name `{0}` registered twice")]
    DuplicateName(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// An automation paired with its persisted settings.
#[derive(Clone)]
pub struct RegisteredAutomation {
    pub settings: AutomationSettings,
    pub automation: Arc<dyn Automation>,
}

impl RegisteredAutomation {
    pub fn id(&self) -> AutomationId {
        self.settings.id
    }

    pub fn name(&self) -> &str {
        &self.settings.name
    }

    pub fn is_enabled(&self) -> bool {
        self.settings.enabled
    }
}

impl std::fmt::Debug for RegisteredAutomation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredAutomation")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

pub struct AutomationRegistry {
    store: Arc<dyn BaseAutomationSettingsStore>,
    entries: RwLock<Vec<RegisteredAutomation>>,
}

impl AutomationRegistry {
    /// Loads settings, retrying while the store is unavailable (for example
    /// while migrations are still running).
    pub async fn load(
        store: Arc<dyn BaseAutomationSettingsStore>,
        automations: Vec<Arc<dyn Automation>>,
        config: RegistryLoadConfig,
    ) -> Result<Self, RegistryError> {
        let mut names = HashSet::new();
        for automation in &automations {
            if !names.insert(automation.name()) {
                return Err(RegistryError::DuplicateName(automation.name().to_string()));
            }
        }

        let persisted = load_with_retry(store.as_ref(), &config).await?;

        for settings in &persisted {
            if !names.contains(settings.name.as_str()) {
                warn!(automation = %settings.name, "persisted automation has no implementation, ignoring");
            }
        }

        let mut entries = Vec::with_capacity(automations.len());
        for automation in automations {
            let settings = match persisted.iter().find(|s| s.name == automation.name()) {
                Some(settings) => settings.clone(),
                None => {
                    let settings =
                        AutomationSettings::new(automation.name(), automation.description());
                    store.insert(&settings).await?;
                    info!(automation = %settings.name, automation_id = %settings.id, "registered new automation");
                    settings
                }
            };
            entries.push(RegisteredAutomation { settings, automation });
        }

        info!(
            total = entries.len(),
            enabled = entries.iter().filter(|e| e.is_enabled()).count(),
            "automation registry loaded"
        );

        Ok(Self {
            store,
            entries: RwLock::new(entries),
        })
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<RegisteredAutomation>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<RegisteredAutomation>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get_all(&self) -> Vec<RegisteredAutomation> {
        self.read().clone()
    }

    pub fn get_by_id(&self, id: AutomationId) -> Option<RegisteredAutomation> {
        self.read().iter().find(|entry| entry.id() == id).cloned()
    }

    pub fn get_by_name(&self, name: &str) -> Option<RegisteredAutomation> {
        self.read().iter().find(|entry| entry.name() == name).cloned()
    }

    pub fn get_enabled(&self) -> Vec<RegisteredAutomation> {
        self.read()
            .iter()
            .filter(|entry| entry.is_enabled())
            .cloned()
            .collect()
    }

    /// Persists the flag, then updates the in-memory view.
    pub async fn set_enabled(&self, id: AutomationId, enabled: bool) -> Result<(), RegistryError> {
        if self.get_by_id(id).is_none() {
            return Err(RegistryError::UnknownAutomation(id));
        }

        self.store.set_enabled(id, enabled).await?;

        if let Some(entry) = self.write().iter_mut().find(|entry| entry.id() == id) {
            entry.settings.enabled = enabled;
        }
        info!(automation_id = %id, enabled, "automation toggled");
        Ok(())
    }
}

async fn load_with_retry(
    store: &dyn BaseAutomationSettingsStore,
    config: &RegistryLoadConfig,
) -> Result<Vec<AutomationSettings>, RegistryError> {
    let attempts = config.attempts.max(1);
    let mut attempt = 1;
    loop {
        match store.load().await {
            Ok(settings) => return Ok(settings),
            Err(e) if attempt < attempts => {
                warn!(
                    attempt,
                    attempts,
                    error = %e,
                    "automation settings not available yet, retrying"
                );
                tokio::time::sleep(config.delay).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(RegistryError::LoadFailed {
                    attempts,
                    source: e,
                })
            }
        }
    }
}
