//! Error code constants

/// Input error codes (0100-0199)
pub const ERR_MISSING_SLUG: &str = "E-MAPP-0100";
pub const ERR_DOCUMENT_TOO_LARGE: &str = "E-MAPP-0101";

/// Fetch error codes (0200-0299)
pub const ERR_FETCH_STATUS: &str = "E-MAPP-0200";
pub const ERR_FETCH_TRANSPORT: &str = "E-MAPP-0201";
pub const ERR_FETCH_FORBIDDEN_PATH: &str = "E-MAPP-0202";
pub const ERR_FETCH_BAD_URL: &str = "E-MAPP-0203";

/// Transform error codes (0300-0399)
pub const ERR_RESOLVE: &str = "E-MAPP-0300";
pub const ERR_SCRIPT_FETCH: &str = "E-MAPP-0301";
pub const ERR_SCRIPT_DATA_URI: &str = "E-MAPP-0302";

/// Realm/executor error codes (0400-0499)
pub const ERR_REALM_SETUP: &str = "E-MAPP-0400";
pub const ERR_SCRIPT_COMPILE: &str = "E-MAPP-0401";
pub const ERR_SCRIPT_RUNTIME: &str = "E-MAPP-0402";
pub const ERR_CALLBACK: &str = "E-MAPP-0403";

/// Catalog error codes (0500-0599)
pub const ERR_CATALOG_PARSE: &str = "E-MAPP-0500";
pub const ERR_CATALOG_IO: &str = "E-MAPP-0501";

/// Command-line error codes (0600-0699)
pub const ERR_CLI_USAGE: &str = "E-MAPP-0600";
pub const ERR_CLI_UNKNOWN_SLUG: &str = "E-MAPP-0601";
pub const ERR_CLI_RUNTIME: &str = "E-MAPP-0602";
