pub mod backup;
pub mod import;
pub mod restore;

use crate::config::Config;
use crate::db::{self, Admin};
use crate::error::{Error, Result};
use rusqlite::Connection;

/// Every command runs as a site admin; there is no anonymous mode.
pub fn require_admin(conn: &Connection, config: &Config) -> Result<Admin> {
    db::get_admin(conn, config.admin_username.as_deref())?.ok_or(Error::NoAdmin)
}

fn heading(text: &str) {
    println!("== {} ==", text);
}
