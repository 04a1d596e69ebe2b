use std::sync::Arc;

use crate::auth::sessions::{AuthStore, BanList};
use crate::config::{Config, MenuStructure};
use crate::i18n::Translations;
use crate::opds::covers::CoverCache;
use crate::stats::Stats;
use crate::store::BookStore;

/// Everything a request handler can reach. The mutable singletons of
/// the server (sessions, bans, statistics, cover cache) live here as
/// explicit fields, each with its own internal synchronisation.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub menu: Arc<MenuStructure>,
    pub store: Arc<dyn BookStore>,
    pub auth: Arc<AuthStore>,
    pub bans: Arc<BanList>,
    pub stats: Arc<Stats>,
    pub covers: Arc<CoverCache>,
    pub tera: Arc<tera::Tera>,
    pub translations: Arc<Translations>,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn BookStore>,
        tera: tera::Tera,
        translations: Translations,
    ) -> Self {
        let state_path = if config.server.state_path.as_os_str().is_empty() {
            None
        } else {
            Some(config.server.state_path.clone())
        };
        let auth = AuthStore::new(state_path);
        auth.seed_authorized(&config.auth.authorized_clients);
        let bans = BanList::new(config.auth.wrong_attempts_count);
        let menu = config.menu();

        Self {
            menu: Arc::new(menu),
            auth: Arc::new(auth),
            bans: Arc::new(bans),
            stats: Arc::new(Stats::new()),
            covers: Arc::new(CoverCache::default()),
            config: Arc::new(config),
            store,
            tera: Arc::new(tera),
            translations: Arc::new(translations),
        }
    }
}
