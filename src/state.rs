use std::sync::Arc;

use crate::{auth::JwtKeys, config::Config, db::Db, uploads::Storage};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub config: Arc<Config>,
    pub jwt: Arc<JwtKeys>,
    pub storage: Storage,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(db: Db, config: Config) -> Self {
        let jwt = JwtKeys::new(&config.jwt_secret, config.jwt_ttl_hours);
        let storage = Storage::new(config.upload_dir.clone());
        Self {
            db,
            jwt: Arc::new(jwt),
            storage,
            config: Arc::new(config),
            http: reqwest::Client::new(),
        }
    }
}
