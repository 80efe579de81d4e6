use std::collections::HashMap;

use crate::core::job_config::JobConfig;
use crate::core::runtime::ContainerMount;

/// Supplies extra container mounts for jobs whose runtime names an app.
pub trait MountProvider: Send + Sync {
    fn mounts(&self, config: &JobConfig) -> Vec<ContainerMount>;
}

impl<F> MountProvider for F
where
    F: Fn(&JobConfig) -> Vec<ContainerMount> + Send + Sync,
{
    fn mounts(&self, config: &JobConfig) -> Vec<ContainerMount> {
        self(config)
    }
}

#[derive(Default)]
pub struct MountRegistry {
    providers: HashMap<String, Box<dyn MountProvider>>,
}

impl MountRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, app_name: impl Into<String>, provider: impl MountProvider + 'static) {
        self.providers.insert(app_name.into(), Box::new(provider));
    }

    pub fn with(mut self, app_name: impl Into<String>, provider: impl MountProvider + 'static) -> Self {
        self.register(app_name, provider);
        self
    }

    pub fn contains(&self, app_name: &str) -> bool {
        self.providers.contains_key(app_name)
    }

    /// Mounts for `app_name`. Sources that do not exist on the host are
    /// dropped with a warning.
    pub fn mounts_for(&self, app_name: &str, config: &JobConfig) -> Vec<ContainerMount> {
        let Some(provider) = self.providers.get(app_name) else {
            tracing::debug!(app_name, "no mount provider registered");
            return Vec::new();
        };
        provider
            .mounts(config)
            .into_iter()
            .filter(|mount| {
                let exists = mount.source.exists();
                if !exists {
                    tracing::warn!(
                        app_name,
                        source = %mount.source.display(),
                        "skipping mount with missing source"
                    );
                }
                exists
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::runner::tests::sh_config;
    use crate::core::runtime::MountMode;

    #[test]
    fn provider_mounts_skip_missing_sources() {
        let tmp = tempfile::tempdir().unwrap();
        let config = sh_config(tmp.path(), "exit 0\n");
        let present = tmp.path().join("settings");
        std::fs::create_dir_all(&present).unwrap();
        let missing = tmp.path().join("nope");

        let registry = MountRegistry::new().with("inbox", move |_: &JobConfig| {
            vec![
                ContainerMount {
                    source: present.clone(),
                    target: "/app/settings".into(),
                    mode: MountMode::Ro,
                },
                ContainerMount {
                    source: missing.clone(),
                    target: "/app/missing".into(),
                    mode: MountMode::Rw,
                },
            ]
        });

        assert!(registry.contains("inbox"));
        let mounts = registry.mounts_for("inbox", &config);
        assert_eq!(mounts.len(), 1);
        assert_eq!(mounts[0].target, std::path::PathBuf::from("/app/settings"));
        assert!(registry.mounts_for("other", &config).is_empty());
    }
}
