//! Shared state for one CLI invocation: config, session, cache and clients.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use shepherd_core::api::{ApiClient, PlacesClient};
use shepherd_core::auth::Session;
use shepherd_core::cache::{CacheManager, CachedData};
use shepherd_core::config::ENV_CACHE_PASSPHRASE;
use shepherd_core::models::{District, Member, Ministry, Visitor};
use shepherd_core::Config;

pub struct App {
    pub config: Config,
    pub session: Session,
    pub cache: CacheManager,
    api: ApiClient,
}

/// Outcome of refreshing one collection
#[derive(Debug)]
pub struct SyncOutcome {
    pub collection: &'static str,
    pub result: Result<usize>,
}

impl App {
    pub fn new() -> Result<Self> {
        let config = match Config::load() {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "Failed to load config, using defaults");
                Config::default()
            }
        };
        debug!(project = ?config.project_id, "Config loaded");

        let cache_dir = Self::cache_dir_for(&config);
        let mut session = Session::new(cache_dir.clone());
        if let Err(e) = session.load() {
            warn!(error = %e, "Ignoring unreadable session file");
        }

        let mut cache = CacheManager::new(cache_dir)?;
        if let Some(passphrase) = std::env::var(ENV_CACHE_PASSPHRASE).ok().filter(|p| !p.is_empty()) {
            cache = cache.with_passphrase(&passphrase)?;
        }

        let mut api = ApiClient::new(config.project_id.clone().unwrap_or_default())?;
        if let Some(ref base_url) = config.firestore_base_url {
            api = api.with_base_url(base_url);
        }
        if let Some(token) = session.token() {
            api.set_token(token.to_string());
        }

        Ok(Self { config, session, cache, api })
    }

    pub fn cache_dir_for(config: &Config) -> PathBuf {
        config.cache_dir().unwrap_or_else(|_| PathBuf::from("./cache"))
    }

    /// The database client, only once signed in to a configured project
    pub fn api(&self) -> Result<&ApiClient> {
        self.config.require_project_id()?;
        if !self.session.is_valid() {
            anyhow::bail!("Not signed in (or the session expired); run `shepherd login`");
        }
        Ok(&self.api)
    }

    /// Client for verifying a token that is not yet part of a session
    pub fn api_with_token(&self, token: &str) -> Result<ApiClient> {
        self.config.require_project_id()?;
        Ok(self.api.with_token(token.to_string()))
    }

    /// Places lookups use an API key, not the session
    pub fn places(&self, api_key: &str) -> PlacesClient {
        PlacesClient::new(self.api.http().clone(), api_key.to_string())
    }

    pub fn access_token(&self) -> Result<String> {
        self.session
            .token()
            .map(str::to_string)
            .context("Not signed in; run `shepherd login`")
    }

    /// Fetch every collection concurrently and cache each one that succeeds
    pub async fn sync_all(&self) -> Result<Vec<SyncOutcome>> {
        let api = self.api()?;
        info!("Refreshing all collections");

        let (members, families, districts, ministries, visitors, events) = tokio::join!(
            api.fetch_members(),
            api.fetch_families(),
            api.fetch_districts(),
            api.fetch_ministries(),
            api.fetch_visitors(),
            api.fetch_events(),
        );

        let outcomes = vec![
            self.store("members", members, |c, d| c.save_members(d)),
            self.store("families", families, |c, d| c.save_families(d)),
            self.store("districts", districts, |c, d| c.save_districts(d)),
            self.store("ministries", ministries, |c, d| c.save_ministries(d)),
            self.store("visitors", visitors, |c, d| c.save_visitors(d)),
            self.store("events", events, |c, d| c.save_events(d)),
        ];
        info!("Refresh complete");
        Ok(outcomes)
    }

    fn store<T>(
        &self,
        collection: &'static str,
        fetched: Result<Vec<T>>,
        save: impl FnOnce(&CacheManager, &[T]) -> Result<()>,
    ) -> SyncOutcome {
        let result = fetched.and_then(|items| {
            save(&self.cache, &items)?;
            debug!(collection, count = items.len(), "Cached collection");
            Ok(items.len())
        });
        if let Err(ref e) = result {
            warn!(collection, error = %e, "Failed to refresh collection");
        }
        SyncOutcome { collection, result }
    }

    /// Cached copy when fresh, otherwise fetch and re-cache. A stale cache is
    /// still used when there is no session to refresh it with.
    async fn cached_or_fetch<T, L, F, Fut, S>(&self, name: &str, load: L, fetch: F, save: S) -> Result<Vec<T>>
    where
        L: FnOnce(&CacheManager) -> Result<Option<CachedData<Vec<T>>>>,
        F: FnOnce(ApiClient) -> Fut,
        Fut: std::future::Future<Output = Result<Vec<T>>>,
        S: FnOnce(&CacheManager, &[T]) -> Result<()>,
    {
        let cached = match load(&self.cache) {
            Ok(cached) => cached,
            Err(e) => {
                warn!(cache = name, error = %e, "Ignoring unreadable cache");
                None
            }
        };

        match cached {
            Some(c) if !c.is_stale() => {
                debug!(cache = name, age = %c.age_display(), "Using cached data");
                Ok(c.data)
            }
            Some(c) if !self.session.is_valid() => {
                warn!(cache = name, age = %c.age_display(), "Using stale cache; not signed in");
                Ok(c.data)
            }
            _ => {
                let items = fetch(self.api()?.clone()).await?;
                if let Err(e) = save(&self.cache, &items) {
                    warn!(cache = name, error = %e, "Failed to cache fetched data");
                }
                Ok(items)
            }
        }
    }

    pub async fn members(&self) -> Result<Vec<Member>> {
        self.cached_or_fetch(
            "members",
            |c| c.load_members(),
            |api| async move { api.fetch_members().await },
            |c, d| c.save_members(d),
        )
        .await
    }

    pub async fn districts(&self) -> Result<Vec<District>> {
        self.cached_or_fetch(
            "districts",
            |c| c.load_districts(),
            |api| async move { api.fetch_districts().await },
            |c, d| c.save_districts(d),
        )
        .await
    }

    pub async fn ministries(&self) -> Result<Vec<Ministry>> {
        self.cached_or_fetch(
            "ministries",
            |c| c.load_ministries(),
            |api| async move { api.fetch_ministries().await },
            |c, d| c.save_ministries(d),
        )
        .await
    }

    pub async fn visitors(&self) -> Result<Vec<Visitor>> {
        self.cached_or_fetch(
            "visitors",
            |c| c.load_visitors(),
            |api| async move { api.fetch_visitors().await },
            |c, d| c.save_visitors(d),
        )
        .await
    }
}
