use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::models::{District, Event, Family, Member, Ministry, Visitor};

use super::crypto::CacheCipher;

/// Consider cache stale after 1 hour
const CACHE_STALE_MINUTES: i64 = 60;

/// Collections holding contact details, encrypted when a passphrase is set
const SENSITIVE: &[&str] = &["members", "families", "visitors"];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedData<T> {
    pub data: T,
    pub cached_at: DateTime<Utc>,
}

impl<T> CachedData<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            cached_at: Utc::now(),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Includes negative ages from clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }

    pub fn is_stale(&self) -> bool {
        self.age_minutes() > CACHE_STALE_MINUTES
    }
}

pub struct CacheManager {
    cache_dir: PathBuf,
    cipher: Option<CacheCipher>,
}

impl CacheManager {
    pub fn new(cache_dir: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&cache_dir).context("Failed to create cache directory")?;
        Ok(Self { cache_dir, cipher: None })
    }

    /// Encrypt member contact data at rest with a key derived from `passphrase`
    pub fn with_passphrase(mut self, passphrase: &str) -> Result<Self> {
        self.cipher = Some(CacheCipher::open(&self.cache_dir, passphrase)?);
        Ok(self)
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn cache_dir(&self) -> &PathBuf {
        &self.cache_dir
    }

    fn cache_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", name))
    }

    fn sealed_path(&self, name: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json.enc", name))
    }

    fn load<T: DeserializeOwned>(&self, name: &str) -> Result<Option<CachedData<T>>> {
        let sealed_path = self.sealed_path(name);
        let contents = if sealed_path.exists() {
            let cipher = self
                .cipher
                .as_ref()
                .with_context(|| format!("Cache file {} is encrypted; a passphrase is required", name))?;
            let sealed = std::fs::read(&sealed_path)
                .with_context(|| format!("Failed to read cache file: {}", name))?;
            cipher
                .decrypt(&sealed)
                .with_context(|| format!("Failed to decrypt cache file: {}", name))?
        } else {
            let path = self.cache_path(name);
            if !path.exists() {
                return Ok(None);
            }
            std::fs::read(&path).with_context(|| format!("Failed to read cache file: {}", name))?
        };

        let cached: CachedData<T> = serde_json::from_slice(&contents)
            .with_context(|| format!("Failed to parse cache file: {}", name))?;
        Ok(Some(cached))
    }

    fn save<T: Serialize>(&self, name: &str, data: &T) -> Result<()> {
        let contents = serde_json::to_vec_pretty(&CachedData::new(data))?;

        match self.cipher.as_ref().filter(|_| SENSITIVE.contains(&name)) {
            Some(cipher) => {
                let sealed = cipher.encrypt(&contents)?;
                std::fs::write(self.sealed_path(name), sealed)
                    .with_context(|| format!("Failed to write cache file: {}", name))?;
                // Never leave a plaintext copy behind
                let plain = self.cache_path(name);
                if plain.exists() {
                    std::fs::remove_file(plain)?;
                }
            }
            None => {
                std::fs::write(self.cache_path(name), contents)
                    .with_context(|| format!("Failed to write cache file: {}", name))?;
                // An older sealed copy would shadow this one on load
                let sealed = self.sealed_path(name);
                if sealed.exists() {
                    std::fs::remove_file(sealed)?;
                }
            }
        }
        debug!(cache = name, "Saved cache");
        Ok(())
    }

    pub fn load_members(&self) -> Result<Option<CachedData<Vec<Member>>>> {
        self.load("members")
    }

    pub fn save_members(&self, members: &[Member]) -> Result<()> {
        self.save("members", &members)
    }

    pub fn load_families(&self) -> Result<Option<CachedData<Vec<Family>>>> {
        self.load("families")
    }

    pub fn save_families(&self, families: &[Family]) -> Result<()> {
        self.save("families", &families)
    }

    pub fn load_districts(&self) -> Result<Option<CachedData<Vec<District>>>> {
        self.load("districts")
    }

    pub fn save_districts(&self, districts: &[District]) -> Result<()> {
        self.save("districts", &districts)
    }

    pub fn load_ministries(&self) -> Result<Option<CachedData<Vec<Ministry>>>> {
        self.load("ministries")
    }

    pub fn save_ministries(&self, ministries: &[Ministry]) -> Result<()> {
        self.save("ministries", &ministries)
    }

    pub fn load_visitors(&self) -> Result<Option<CachedData<Vec<Visitor>>>> {
        self.load("visitors")
    }

    pub fn save_visitors(&self, visitors: &[Visitor]) -> Result<()> {
        self.save("visitors", &visitors)
    }

    pub fn load_events(&self) -> Result<Option<CachedData<Vec<Event>>>> {
        self.load("events")
    }

    pub fn save_events(&self, events: &[Event]) -> Result<()> {
        self.save("events", &events)
    }

    fn load_age<T>(&self, name: &str, loader: impl FnOnce() -> Result<Option<CachedData<T>>>) -> Option<String> {
        match loader() {
            Ok(Some(cached)) => Some(cached.age_display()),
            Ok(None) => None,
            Err(e) => {
                debug!(cache = name, error = %e, "Failed to load cache for age display");
                None
            }
        }
    }

    pub fn get_cache_ages(&self) -> CacheAges {
        CacheAges {
            members: self.load_age("members", || self.load_members()),
            families: self.load_age("families", || self.load_families()),
            districts: self.load_age("districts", || self.load_districts()),
            ministries: self.load_age("ministries", || self.load_ministries()),
            visitors: self.load_age("visitors", || self.load_visitors()),
            events: self.load_age("events", || self.load_events()),
        }
    }

    fn is_cache_stale<T>(&self, name: &str, loader: impl FnOnce() -> Result<Option<CachedData<T>>>) -> bool {
        match loader() {
            Ok(Some(cached)) => cached.is_stale(),
            Ok(None) => true,
            Err(e) => {
                warn!(cache = name, error = %e, "Unreadable cache treated as stale");
                true
            }
        }
    }

    /// Whether any collection is missing, unreadable, or older than an hour
    pub fn any_stale(&self) -> bool {
        [
            self.is_cache_stale("members", || self.load_members()),
            self.is_cache_stale("families", || self.load_families()),
            self.is_cache_stale("districts", || self.load_districts()),
            self.is_cache_stale("ministries", || self.load_ministries()),
            self.is_cache_stale("visitors", || self.load_visitors()),
            self.is_cache_stale("events", || self.load_events()),
        ]
        .into_iter()
        .any(|stale| stale)
    }
}

#[derive(Debug, Default)]
pub struct CacheAges {
    pub members: Option<String>,
    pub families: Option<String>,
    pub districts: Option<String>,
    pub ministries: Option<String>,
    pub visitors: Option<String>,
    pub events: Option<String>,
}

impl CacheAges {
    pub fn rows(&self) -> [(&'static str, &Option<String>); 6] {
        [
            ("members", &self.members),
            ("families", &self.families),
            ("districts", &self.districts),
            ("ministries", &self.ministries),
            ("visitors", &self.visitors),
            ("events", &self.events),
        ]
    }

    pub fn last_updated(&self) -> String {
        self.rows()
            .iter()
            .find_map(|&(_, age)| age.clone())
            .unwrap_or_else(|| "never".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn members() -> Vec<Member> {
        vec![Member {
            id: "m1".into(),
            first_name: "Ruth".into(),
            last_name: "Moab".into(),
            email: Some("ruth@example.org".into()),
            ..Default::default()
        }]
    }

    #[test]
    fn test_cached_data_age_display() {
        let mut cached = CachedData::new(vec![1]);
        assert_eq!(cached.age_display(), "just now");
        cached.cached_at = Utc::now() - Duration::minutes(15);
        assert_eq!(cached.age_display(), "15m ago");
        cached.cached_at = Utc::now() - Duration::minutes(95);
        assert_eq!(cached.age_display(), "2h ago");
        cached.cached_at = Utc::now() - Duration::hours(50);
        assert_eq!(cached.age_display(), "2d ago");
    }

    #[test]
    fn test_cached_data_is_stale() {
        let fresh = CachedData::new(vec![1]);
        assert!(!fresh.is_stale());

        let mut old = CachedData::new(vec![1]);
        old.cached_at = Utc::now() - Duration::minutes(61);
        assert!(old.is_stale());
    }

    #[test]
    fn test_plain_round_trip_and_staleness() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(dir.path().to_path_buf()).unwrap();
        assert!(cache.load_members().unwrap().is_none());
        assert!(cache.any_stale());

        cache.save_members(&members()).unwrap();
        let loaded = cache.load_members().unwrap().unwrap();
        assert_eq!(loaded.data[0].first_name, "Ruth");
        assert!(dir.path().join("members.json").exists());

        cache.save_families(&[]).unwrap();
        cache.save_districts(&[]).unwrap();
        cache.save_ministries(&[]).unwrap();
        cache.save_visitors(&[]).unwrap();
        cache.save_events(&[]).unwrap();
        assert!(!cache.any_stale());
        assert_eq!(cache.get_cache_ages().last_updated(), "just now");
    }

    #[test]
    fn test_encrypted_members_need_the_passphrase() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheManager::new(dir.path().to_path_buf())
            .unwrap()
            .with_passphrase("shepherd")
            .unwrap();
        cache.save_members(&members()).unwrap();
        cache.save_events(&[]).unwrap();

        assert!(dir.path().join("members.json.enc").exists());
        assert!(!dir.path().join("members.json").exists());
        // Non-sensitive collections stay readable
        assert!(dir.path().join("events.json").exists());
        let raw = std::fs::read(dir.path().join("members.json.enc")).unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("ruth@example.org"));

        let reopened = CacheManager::new(dir.path().to_path_buf())
            .unwrap()
            .with_passphrase("shepherd")
            .unwrap();
        assert_eq!(reopened.load_members().unwrap().unwrap().data.len(), 1);

        let wrong = CacheManager::new(dir.path().to_path_buf())
            .unwrap()
            .with_passphrase("not it")
            .unwrap();
        let err = wrong.load_members().unwrap_err();
        assert!(format!("{:#}", err).contains("wrong passphrase"));

        let none = CacheManager::new(dir.path().to_path_buf()).unwrap();
        assert!(none.load_members().is_err());
        assert!(none.get_cache_ages().members.is_none());
    }

    #[test]
    fn test_plain_save_replaces_sealed_copy() {
        let dir = tempfile::tempdir().unwrap();
        let sealed = CacheManager::new(dir.path().to_path_buf())
            .unwrap()
            .with_passphrase("shepherd")
            .unwrap();
        let mut old = members();
        old[0].id = "old".into();
        sealed.save_members(&old).unwrap();

        let plain = CacheManager::new(dir.path().to_path_buf()).unwrap();
        let mut new = members();
        new[0].id = "new".into();
        plain.save_members(&new).unwrap();

        assert!(!dir.path().join("members.json.enc").exists());
        assert_eq!(plain.load_members().unwrap().unwrap().data[0].id, "new");
        assert_eq!(sealed.load_members().unwrap().unwrap().data[0].id, "new");
    }

    #[test]
    fn test_cache_ages_last_updated_empty() {
        assert_eq!(CacheAges::default().last_updated(), "never");
    }
}
