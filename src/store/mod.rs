/*!
Data DB interaction module.

The Postgres database to which this connects holds everything but
credentials (those live in the auth DB; see `crate::auth`).

```sql
CREATE TABLE departments (
    id   BIGSERIAL PRIMARY KEY,
    name TEXT UNIQUE NOT NULL
);

CREATE TABLE users (
    id    BIGSERIAL PRIMARY KEY,
    email TEXT UNIQUE NOT NULL,
    role  TEXT NOT NULL,     /* one of { 'Admin', 'Teacher', 'Student' } */
    name  TEXT NOT NULL
);

CREATE TABLE subjects (
    id         BIGSERIAL PRIMARY KEY,
    name       TEXT NOT NULL,
    department BIGINT NOT NULL REFERENCES departments(id),
    teacher    BIGINT REFERENCES users(id)
);

CREATE TABLE students (
    uid        BIGINT PRIMARY KEY REFERENCES users(id),
    student_id TEXT UNIQUE NOT NULL,
    department BIGINT REFERENCES departments(id)
);

CREATE TABLE enrollments (
    student BIGINT REFERENCES students(uid),
    subject BIGINT REFERENCES subjects(id),
    PRIMARY KEY (student, subject)
);

CREATE TABLE marks (
    id        BIGSERIAL PRIMARY KEY,
    student   BIGINT NOT NULL REFERENCES students(uid),
    subject   BIGINT NOT NULL REFERENCES subjects(id),
    test_date DATE NOT NULL,
    marks     REAL NOT NULL,
    total     REAL NOT NULL
);

CREATE TABLE schedules (
    id          BIGSERIAL PRIMARY KEY,
    subject     BIGINT NOT NULL REFERENCES subjects(id),
    department  BIGINT NOT NULL REFERENCES departments(id),
    start_date  DATE NOT NULL,
    duration    INTEGER NOT NULL,   /* days */
    class_dates DATE[] NOT NULL
);
```
*/
use std::fmt::Write;

use tokio_postgres::{Client, NoTls};

pub mod academic;
pub mod marks;
pub mod schedule;
pub mod users;

static SCHEMA: &[(&str, &str, &str)] = &[
    (
        "SELECT FROM information_schema.tables WHERE table_name = 'departments'",
        "CREATE TABLE departments (
            id   BIGSERIAL PRIMARY KEY,
            name TEXT UNIQUE NOT NULL
        )",
        "DROP TABLE departments",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'users'",
        "CREATE TABLE users (
            id    BIGSERIAL PRIMARY KEY,
            email TEXT UNIQUE NOT NULL,
            role  TEXT NOT NULL,
            name  TEXT NOT NULL
        )",
        "DROP TABLE users",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'subjects'",
        "CREATE TABLE subjects (
            id         BIGSERIAL PRIMARY KEY,
            name       TEXT NOT NULL,
            department BIGINT NOT NULL REFERENCES departments(id),
            teacher    BIGINT REFERENCES users(id)
        )",
        "DROP TABLE subjects",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'students'",
        "CREATE TABLE students (
            uid        BIGINT PRIMARY KEY REFERENCES users(id),
            student_id TEXT UNIQUE NOT NULL,
            department BIGINT REFERENCES departments(id)
        )",
        "DROP TABLE students",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'enrollments'",
        "CREATE TABLE enrollments (
            student BIGINT REFERENCES students(uid),
            subject BIGINT REFERENCES subjects(id),
            PRIMARY KEY (student, subject)
        )",
        "DROP TABLE enrollments",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'marks'",
        "CREATE TABLE marks (
            id        BIGSERIAL PRIMARY KEY,
            student   BIGINT NOT NULL REFERENCES students(uid),
            subject   BIGINT NOT NULL REFERENCES subjects(id),
            test_date DATE NOT NULL,
            marks     REAL NOT NULL,
            total     REAL NOT NULL
        )",
        "DROP TABLE marks",
    ),

    (
        "SELECT FROM information_schema.tables WHERE table_name = 'schedules'",
        "CREATE TABLE schedules (
            id          BIGSERIAL PRIMARY KEY,
            subject     BIGINT NOT NULL REFERENCES subjects(id),
            department  BIGINT NOT NULL REFERENCES departments(id),
            start_date  DATE NOT NULL,
            duration    INTEGER NOT NULL,
            class_dates DATE[] NOT NULL
        )",
        "DROP TABLE schedules",
    ),
];

#[derive(Debug, PartialEq)]
pub struct DbError(String);

impl DbError {
    /// Prepend some contextual `annotation` for the error.
    fn annotate(self, annotation: &str) -> Self {
        let s = format!("{}: {}", annotation, &self.0);
        Self(s)
    }

    pub fn display(&self) -> &str { &self.0 }
}

impl std::fmt::Display for DbError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", &self.0)
    }
}

impl From<tokio_postgres::error::Error> for DbError {
    fn from(e: tokio_postgres::error::Error) -> DbError {
        let mut s = format!("Data DB: {}", &e);
        if let Some(dbe) = e.as_db_error() {
            let _ = write!(&mut s, "; {}", dbe);
        }
        DbError(s)
    }
}

impl From<String> for DbError {
    fn from(s: String) -> DbError { DbError(s) }
}

impl From<DbError> for String {
    fn from(e: DbError) -> String { e.0 }
}

pub struct Store {
    connection_string: String,
}

impl Store {
    pub fn new(connection_string: String) -> Self {
        log::trace!("Store::new( {:?} ) called.", &connection_string);

        Self { connection_string }
    }

    async fn connect(&self) -> Result<Client, DbError> {
        log::trace!(
            "Store::connect() called w/connection string {:?}",
            &self.connection_string
        );

        match tokio_postgres::connect(&self.connection_string, NoTls).await {
            Ok((client, connection)) => {
                log::trace!("    ...connection successful.");
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        log::error!("Data DB connection error: {}", &e);
                    } else {
                        log::trace!("tokio connection runtime drops.");
                    }
                });
                Ok(client)
            },
            Err(e) => {
                let dberr = DbError::from(e);
                log::trace!("    ...connection failed: {:?}", &dberr);
                Err(dberr.annotate("Unable to connect"))
            }
        }
    }

    pub async fn ensure_db_schema(&self) -> Result<(), DbError> {
        log::trace!("Store::ensure_db_schema() called.");

        let mut client = self.connect().await?;
        let t = client.transaction().await
            .map_err(|e| DbError::from(e)
                .annotate("Data DB unable to begin transaction"))?;

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
            .map_err(|e| DbError::from(e)
                .annotate("Error committing transaction"))
    }

    /**
    Drop all database tables to fully reset database state.

    This is only meant for cleanup after testing. It is advisable to look at
    the ERROR level log output when testing to ensure this method did its job.
    */
    #[cfg(test)]
    pub async fn nuke_database(&self) -> Result<(), DbError> {
        log::trace!("Store::nuke_database() called.");

        let client = self.connect().await?;

        for (_, _, drop_stmt) in SCHEMA.iter().rev() {
            if let Err(e) = client.execute(drop_stmt.to_owned(), &[]).await {
                let err = DbError::from(e);
                log::error!("Error dropping: {:?}: {}", &drop_stmt, &err.display());
            }
        }

        log::trace!("    ....nuking complete.");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    /*!
    These tests assume you have a Postgres instance running on your local
    machine with resources named according to what you see in the
    `static TEST_CONNECTION &str`:

    ```text
    user: ojt_test
    password: ojt_test

    with write access to:

    database: ojt_store_test
    ```

    They only run when `OJT_DB_TESTS` is set:

    ```bash
    OJT_DB_TESTS=1 cargo test
    ```
    */
    use super::*;
    use crate::tests::{db_tests_enabled, ensure_logging};

    use serial_test::serial;

    pub static TEST_CONNECTION: &str = "host=localhost user=ojt_test password='ojt_test' dbname=ojt_store_test";

    /**
    This function is for getting the database back in a blank slate state if
    a test panics partway through and leaves it munged.

    ```bash
    OJT_DB_TESTS=1 cargo test reset_store
    ```
    */
    #[tokio::test]
    #[serial]
    async fn reset_store() {
        ensure_logging();
        if !db_tests_enabled() { return; }
        let db = Store::new(TEST_CONNECTION.to_owned());
        db.nuke_database().await.unwrap();
    }

    #[tokio::test]
    #[serial]
    async fn create_store() {
        ensure_logging();
        if !db_tests_enabled() { return; }

        let db = Store::new(TEST_CONNECTION.to_owned());
        db.ensure_db_schema().await.unwrap();
        db.ensure_db_schema().await.unwrap();
        db.nuke_database().await.unwrap();
    }
}
