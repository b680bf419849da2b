use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    pub fn new() -> Self {
        let base = dirs::home_dir()
            .map(|h| h.join(".trolley"))
            .unwrap_or_else(|| PathBuf::from(".trolley"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.yaml")
    }

    pub fn list_file(&self) -> PathBuf {
        self.base.join("shopping-list.yaml")
    }

    pub fn preferences_file(&self) -> PathBuf {
        self.base.join("preferences.yaml")
    }

    pub fn profile_dir(&self) -> PathBuf {
        self.base.join("chrome-profile")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)?;
        std::fs::create_dir_all(self.profile_dir())?;
        Ok(())
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
