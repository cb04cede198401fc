/*!
Authentication database: password hashes and session keys.

This lives in its own Postgres database, separate from the data DB, so
that the data DB can be handed around without handing around credentials.

```sql
CREATE TABLE users (
    uname TEXT PRIMARY KEY,   /* the user's email */
    hash  TEXT NOT NULL       /* Argon2 PHC string */
);

CREATE TABLE keys (
    key    TEXT PRIMARY KEY,
    uname  TEXT NOT NULL REFERENCES users(uname) ON DELETE CASCADE,
    issued TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT now()
);
```
*/
use std::fmt::Write;

use argon2::{
    Argon2,
    password_hash::{rand_core::OsRng, SaltString},
    PasswordHash, PasswordHasher, PasswordVerifier,
};
use rand::{distributions::Alphanumeric, Rng};
use time::{Duration, OffsetDateTime};
use tokio_postgres::{Client, NoTls};

const DEFAULT_KEY_LENGTH: usize = 32;
/// Seconds for which an issued key remains valid.
const DEFAULT_KEY_LIFE: u64 = 60 * 60 * 8;

static SCHEMA: &[(&str, &str, &str)] = &[
    (
        "SELECT FROM information_schema.tables WHERE table_name = 'users'",
        "CREATE TABLE users (
            uname TEXT PRIMARY KEY,
            hash  TEXT NOT NULL
        )",
        "DROP TABLE users",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'keys'",
        "CREATE TABLE keys (
            key    TEXT PRIMARY KEY,
            uname  TEXT NOT NULL REFERENCES users(uname) ON DELETE CASCADE,
            issued TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT now()
        )",
        "DROP TABLE keys",
    ),
];

/// Outcome of an authentication attempt that didn't hit an internal error.
#[derive(Debug, PartialEq)]
pub enum AuthResult {
    Ok,
    NoSuchUser,
    BadPassword,
    InvalidKey,
    Key(String),
}

#[derive(Debug, PartialEq)]
pub struct AuthError(String);

impl AuthError {
    fn annotate(self, annotation: &str) -> Self {
        Self(format!("{}: {}", annotation, &self.0))
    }

    pub fn display(&self) -> &str { &self.0 }
}

impl std::fmt::Display for AuthError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", &self.0)
    }
}

impl From<tokio_postgres::error::Error> for AuthError {
    fn from(e: tokio_postgres::error::Error) -> AuthError {
        let mut s = format!("Auth DB: {}", &e);
        if let Some(dbe) = e.as_db_error() {
            let _ = write!(&mut s, "; {}", dbe);
        }
        AuthError(s)
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(e: argon2::password_hash::Error) -> AuthError {
        AuthError(format!("Password hashing: {}", &e))
    }
}

impl From<AuthError> for String {
    fn from(e: AuthError) -> String { e.0 }
}

pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AuthError> {
    let parsed = PasswordHash::new(hash)?;
    match Argon2::default().verify_password(password.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub struct Db {
    connection_string: String,
    key_length: usize,
    key_life: Duration,
}

impl Db {
    pub fn new(connection_string: String) -> Self {
        log::trace!("auth::Db::new( {:?} ) called.", &connection_string);

        Self {
            connection_string,
            key_length: DEFAULT_KEY_LENGTH,
            key_life: Duration::seconds(DEFAULT_KEY_LIFE as i64),
        }
    }

    /// Set the number of seconds an issued key stays valid.
    ///
    /// Will quietly do nothing if set to zero.
    pub fn set_key_life(&mut self, seconds: u64) {
        if seconds > 0 {
            self.key_life = Duration::seconds(seconds as i64);
        }
    }

    fn generate_key(&self) -> String {
        rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(self.key_length)
            .map(char::from)
            .collect()
    }

    async fn connect(&self) -> Result<Client, AuthError> {
        log::trace!("auth::Db::connect() called.");

        match tokio_postgres::connect(&self.connection_string, NoTls).await {
            Ok((client, connection)) => {
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        log::error!("Auth DB connection error: {}", &e);
                    }
                });
                Ok(client)
            },
            Err(e) => Err(AuthError::from(e).annotate("Unable to connect")),
        }
    }

    pub async fn ensure_db_schema(&self) -> Result<(), AuthError> {
        log::trace!("auth::Db::ensure_db_schema() called.");

        let mut client = self.connect().await?;
        let t = client.transaction().await
            .map_err(|e| AuthError::from(e)
                .annotate("Auth DB unable to begin transaction"))?;

        for (test_stmt, create_stmt, _) in SCHEMA.iter() {
            if t.query_opt(test_stmt.to_owned(), &[]).await?.is_none() {
                log::info!(
                    "{:?} returned no results; attempting to insert table.",
                    test_stmt
                );
                t.execute(create_stmt.to_owned(), &[]).await?;
            }
        }

        t.commit().await
            .map_err(|e| AuthError::from(e)
                .annotate("Error committing transaction"))
    }

    #[cfg(test)]
    pub async fn nuke_database(&self) -> Result<(), AuthError> {
        log::trace!("auth::Db::nuke_database() called.");

        let client = self.connect().await?;

        for (_, _, drop_stmt) in SCHEMA.iter().rev() {
            if let Err(e) = client.execute(drop_stmt.to_owned(), &[]).await {
                let err = AuthError::from(e);
                log::error!("Error dropping: {:?}: {}", &drop_stmt, &err);
            }
        }

        Ok(())
    }

    pub async fn add_user(
        &self,
        uname: &str,
        password: &str,
    ) -> Result<(), AuthError> {
        log::trace!("auth::Db::add_user( {:?}, [ password ] ) called.", uname);

        let hash = hash_password(password)?;
        let client = self.connect().await?;
        match client.execute(
            "INSERT INTO users (uname, hash) VALUES ($1, $2)",
            &[&uname, &hash]
        ).await {
            Ok(_) => Ok(()),
            Err(e) => Err(AuthError::from(e)
                .annotate(&format!("Unable to add credentials for {:?}", uname))),
        }
    }

    pub async fn add_users(
        &self,
        users: &[(&str, &str)],
    ) -> Result<usize, AuthError> {
        log::trace!("auth::Db::add_users( [ {} users ] ) called.", users.len());

        let mut hashes: Vec<String> = Vec::with_capacity(users.len());
        for (_, password) in users.iter() {
            hashes.push(hash_password(password)?);
        }

        let mut client = self.connect().await?;
        let t = client.transaction().await?;
        let stmt = t.prepare("INSERT INTO users (uname, hash) VALUES ($1, $2)").await?;
        for ((uname, _), hash) in users.iter().zip(hashes.iter()) {
            t.execute(&stmt, &[uname, hash]).await?;
        }
        t.commit().await?;

        Ok(users.len())
    }

    pub async fn set_password(
        &self,
        uname: &str,
        password: &str,
    ) -> Result<AuthResult, AuthError> {
        log::trace!("auth::Db::set_password( {:?}, [ password ] ) called.", uname);

        let hash = hash_password(password)?;
        let mut client = self.connect().await?;
        let t = client.transaction().await?;
        let n = t.execute(
            "UPDATE users SET hash = $1 WHERE uname = $2",
            &[&hash, &uname]
        ).await?;
        if n == 0 {
            return Ok(AuthResult::NoSuchUser);
        }
        // Changing a password invalidates outstanding keys.
        t.execute("DELETE FROM keys WHERE uname = $1", &[&uname]).await?;
        t.commit().await?;

        Ok(AuthResult::Ok)
    }

    pub async fn delete_user(&self, uname: &str) -> Result<(), AuthError> {
        log::trace!("auth::Db::delete_user( {:?} ) called.", uname);

        let client = self.connect().await?;
        let n = client.execute("DELETE FROM users WHERE uname = $1", &[&uname]).await?;
        if n == 0 {
            log::warn!("No credentials for {:?} to delete.", uname);
        }
        Ok(())
    }

    pub async fn check_password(
        &self,
        uname: &str,
        password: &str,
    ) -> Result<AuthResult, AuthError> {
        log::trace!("auth::Db::check_password( {:?}, [ password ] ) called.", uname);

        let client = self.connect().await?;
        let row = match client.query_opt(
            "SELECT hash FROM users WHERE uname = $1",
            &[&uname]
        ).await? {
            None => { return Ok(AuthResult::NoSuchUser); },
            Some(row) => row,
        };
        let hash: &str = row.try_get("hash")?;

        if verify_password(password, hash)? {
            Ok(AuthResult::Ok)
        } else {
            Ok(AuthResult::BadPassword)
        }
    }

    pub async fn check_password_and_issue_key(
        &self,
        uname: &str,
        password: &str,
    ) -> Result<AuthResult, AuthError> {
        log::trace!(
            "auth::Db::check_password_and_issue_key( {:?}, [ password ] ) called.",
            uname
        );

        match self.check_password(uname, password).await? {
            AuthResult::Ok => {},
            x => { return Ok(x); },
        }

        let key = self.generate_key();
        let client = self.connect().await?;
        client.execute(
            "INSERT INTO keys (key, uname) VALUES ($1, $2)",
            &[&key, &uname]
        ).await?;

        Ok(AuthResult::Key(key))
    }

    pub async fn check_key(
        &self,
        uname: &str,
        key: &str,
    ) -> Result<AuthResult, AuthError> {
        log::trace!("auth::Db::check_key( {:?}, [ key ] ) called.", uname);

        let client = self.connect().await?;
        let row = match client.query_opt(
            "SELECT issued FROM keys WHERE key = $1 AND uname = $2",
            &[&key, &uname]
        ).await? {
            None => { return Ok(AuthResult::InvalidKey); },
            Some(row) => row,
        };
        let issued: OffsetDateTime = row.try_get("issued")?;

        if OffsetDateTime::now_utc() - issued > self.key_life {
            client.execute("DELETE FROM keys WHERE key = $1", &[&key]).await?;
            return Ok(AuthResult::InvalidKey);
        }

        Ok(AuthResult::Ok)
    }

    /// Remove every expired key. Returns the number removed.
    pub async fn cull_old_keys(&self) -> Result<u64, AuthError> {
        log::trace!("auth::Db::cull_old_keys() called.");

        let cutoff = OffsetDateTime::now_utc() - self.key_life;
        let client = self.connect().await?;
        let n = client.execute(
            "DELETE FROM keys WHERE issued < $1",
            &[&cutoff]
        ).await?;

        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    /*!
    The database tests assume a Postgres instance on the local machine:

    ```text
    user: ojt_test
    password: ojt_test

    with write access to:

    database: ojt_auth_test
    ```

    They only run when `OJT_DB_TESTS` is set:

    ```bash
    OJT_DB_TESTS=1 cargo test
    ```
    */
    use super::*;
    use crate::tests::{db_tests_enabled, ensure_logging};

    use serial_test::serial;

    pub static TEST_CONNECTION: &str = "host=localhost user=ojt_test password='ojt_test' dbname=ojt_auth_test";

    #[test]
    fn hashing() {
        let h = hash_password("correct horse").unwrap();
        assert!(h.starts_with("$argon2"));
        assert!(verify_password("correct horse", &h).unwrap());
        assert!(!verify_password("battery staple", &h).unwrap());
        // Same password, different salt.
        assert_ne!(h, hash_password("correct horse").unwrap());
        assert!(verify_password("anything", "not a phc string").is_err());
    }

    #[test]
    fn keys_are_random() {
        let db = Db::new(TEST_CONNECTION.to_owned());
        let (a, b) = (db.generate_key(), db.generate_key());
        assert_eq!(a.len(), DEFAULT_KEY_LENGTH);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    #[serial]
    async fn reset_auth() {
        ensure_logging();
        if !db_tests_enabled() { return; }
        let db = Db::new(TEST_CONNECTION.to_owned());
        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn password_and_keys() {
        ensure_logging();
        if !db_tests_enabled() { return; }

        let db = Db::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();

        db.add_user("t@example.org", "pw").await.unwrap();
        assert!(db.add_user("t@example.org", "pw").await.is_err());

        assert_eq!(db.check_password("t@example.org", "pw").await.unwrap(), AuthResult::Ok);
        assert_eq!(db.check_password("t@example.org", "nope").await.unwrap(), AuthResult::BadPassword);
        assert_eq!(db.check_password("x@example.org", "pw").await.unwrap(), AuthResult::NoSuchUser);

        let key = match db.check_password_and_issue_key("t@example.org", "pw").await.unwrap() {
            AuthResult::Key(k) => k,
            x => panic!("expected a key, got {:?}", &x),
        };
        assert_eq!(db.check_key("t@example.org", &key).await.unwrap(), AuthResult::Ok);
        assert_eq!(db.check_key("x@example.org", &key).await.unwrap(), AuthResult::InvalidKey);

        assert_eq!(db.set_password("t@example.org", "pw2").await.unwrap(), AuthResult::Ok);
        assert_eq!(db.check_key("t@example.org", &key).await.unwrap(), AuthResult::InvalidKey);
        assert_eq!(db.check_password("t@example.org", "pw2").await.unwrap(), AuthResult::Ok);

        db.delete_user("t@example.org").await.unwrap();
        assert_eq!(db.check_password("t@example.org", "pw2").await.unwrap(), AuthResult::NoSuchUser);

        db.nuke_database().await.unwrap();
    }
}
