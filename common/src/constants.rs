pub const FINALIZER: &str = "mcing.kmdkuk.com/finalizer";
pub const CONTROLLER_NAME: &str = "mcing-controller";

pub const MINECRAFT_CONTAINER_NAME: &str = "minecraft";
pub const RCON_PORT: u16 = 25575;
pub const DATA_PATH: &str = "/data";
pub const CONFIG_PATH: &str = "/mcing-config";
pub const SERVER_PROPS_NAME: &str = "server.properties";
pub const OPS_NAME: &str = "ops.json";

pub const AGENT_PORT: u16 = 9080;

pub const WHITELIST_PROPS: &str = "white-list";
pub const RCON_PORT_PROPS: &str = "rcon.port";
pub const RCON_PASSWORD_ENV_NAME: &str = "RCON_PASSWORD";
pub const DEFAULT_RCON_PASSWORD: &str = "minecraft";

/// Always left out of data exports; the server holds it open while running.
pub const BACKUP_BASELINE_EXCLUDE: &str = "session.lock";
