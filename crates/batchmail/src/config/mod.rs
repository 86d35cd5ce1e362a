pub mod settings;

pub use settings::{
    Settings, DEFAULT_APP_NAME, DEFAULT_PENDING_STORAGE_PATH, DEFAULT_REDIRECT_URI,
    DEFAULT_SESSION_LIFETIME_MINUTES, DEFAULT_TOKEN_STORAGE_PATH, ENV_PREFIX,
};
