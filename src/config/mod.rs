mod settings;

pub use settings::{
    CacheSettings, Command, Config, ServerSettings, SessionSettings, Settings,
    ENV_BROWSER_EXECUTABLE, ENV_CACHE_TTL, ENV_HOST, ENV_PORT,
};
