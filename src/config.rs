/*!
Structs to hold configuration data and global variables.
*/
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::RwLock;

use crate::{
    academic::{Department, Subject},
    auth, auth::AuthResult,
    marks::{Mark, MarkRow},
    store::Store,
    user::{NewUser, Role, Student, StudentRecord, Teacher, User},
};

#[derive(Deserialize)]
struct ConfigFile {
    auth_db_connect_string: Option<String>,
    data_db_connect_string: Option<String>,
    admin_email: Option<String>,
    admin_password: Option<String>,
    admin_name: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    key_life: Option<u64>,
    templates_dir: Option<String>,
    static_dir: Option<String>,
}

pub struct Cfg {
    pub auth_db_connect_string: String,
    pub data_db_connect_string: String,
    pub default_admin_email: String,
    pub default_admin_password: String,
    pub default_admin_name: String,
    pub addr: SocketAddr,
    /// Seconds an issued session key stays valid.
    pub key_life: u64,
    pub templates_dir: PathBuf,
    pub static_dir: PathBuf,
}

impl std::fmt::Debug for Cfg {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Cfg")
            .field("auth_db_connect_string", &self.auth_db_connect_string)
            .field("data_db_connect_string", &self.data_db_connect_string)
            .field("default_admin_email", &self.default_admin_email)
            .field("default_admin_name", &self.default_admin_name)
            .field("addr", &self.addr)
            .field("key_life", &self.key_life)
            .field("templates_dir", &self.templates_dir)
            .field("static_dir", &self.static_dir)
            .finish_non_exhaustive()
    }
}

impl std::default::Default for Cfg {
    fn default() -> Self {
        Self {
            auth_db_connect_string: "host=localhost user=ojt_test password='ojt_test' dbname=ojt_auth_test".to_owned(),
            data_db_connect_string: "host=localhost user=ojt_test password='ojt_test' dbname=ojt_store_test".to_owned(),
            default_admin_email: "admin@ojt.not.an.address".to_owned(),
            default_admin_password: "toot".to_owned(),
            default_admin_name: "Administrator".to_owned(),
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 8001),
            key_life: 60 * 60 * 8,
            templates_dir: PathBuf::from("templates"),
            static_dir: PathBuf::from("static"),
        }
    }
}

impl Cfg {
    pub fn from_toml(text: &str) -> Result<Self, String> {
        let cf: ConfigFile = toml::from_str(text)
            .map_err(|e| format!("Unable to deserialize config file: {}", &e))?;

        let mut c = Self::default();

        if let Some(s) = cf.auth_db_connect_string {
            c.auth_db_connect_string = s;
        }
        if let Some(s) = cf.data_db_connect_string {
            c.data_db_connect_string = s;
        }
        if let Some(s) = cf.admin_email {
            c.default_admin_email = s;
        }
        if let Some(s) = cf.admin_password {
            c.default_admin_password = s;
        }
        if let Some(s) = cf.admin_name {
            c.default_admin_name = s;
        }
        if let Some(s) = cf.host {
            c.addr.set_ip(
                s.parse().map_err(|e| format!(
                    "Error parsing {:?} as IP address: {}",
                    &s, &e
                ))?
            );
        }
        if let Some(n) = cf.port {
            c.addr.set_port(n);
        }
        if let Some(n) = cf.key_life {
            if n == 0 {
                return Err("key_life must be positive.".to_owned());
            }
            c.key_life = n;
        }
        if let Some(s) = cf.templates_dir {
            c.templates_dir = PathBuf::from(s);
        }
        if let Some(s) = cf.static_dir {
            c.static_dir = PathBuf::from(s);
        }

        Ok(c)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, String> {
        let path = path.as_ref();
        let file_contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Unable to read config file {}: {}", path.display(), &e))?;
        Cfg::from_toml(&file_contents)
    }
}

/// Why a `Glob` write was refused.
#[derive(Debug, PartialEq)]
pub enum GlobError {
    /// The request makes no sense given what's in the portal.
    Invalid(String),
    /// The requester isn't allowed to do that.
    Forbidden(String),
    /// One of the databases failed.
    Internal(String),
}

impl GlobError {
    fn annotate(self, annotation: &str) -> Self {
        match self {
            GlobError::Invalid(s) => GlobError::Invalid(format!("{}: {}", annotation, &s)),
            GlobError::Forbidden(s) => GlobError::Forbidden(format!("{}: {}", annotation, &s)),
            GlobError::Internal(s) => GlobError::Internal(format!("{}: {}", annotation, &s)),
        }
    }
}

impl std::fmt::Display for GlobError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            GlobError::Invalid(s) | GlobError::Forbidden(s) | GlobError::Internal(s) => {
                write!(f, "{}", s)
            },
        }
    }
}

impl From<GlobError> for String {
    fn from(e: GlobError) -> String { e.to_string() }
}

/**
This guy will haul around some global variables and be passed in an
`axum::Extension` to the handlers who need him.

The user, department, and subject maps are caches of the data DB; any
method that writes one of those tables is followed by the appropriate
`refresh_xxx()` call.
*/
pub struct Glob {
    auth: Arc<RwLock<auth::Db>>,
    data: Arc<RwLock<Store>>,
    /// Keyed by email.
    pub users: HashMap<String, User>,
    pub departments: HashMap<i64, Department>,
    pub subjects: HashMap<i64, Subject>,
    pub addr: SocketAddr,
}

impl Glob {
    /// A `Glob` with empty caches. Doesn't touch either database.
    pub fn new(cfg: &Cfg) -> Glob {
        let mut auth_db = auth::Db::new(cfg.auth_db_connect_string.clone());
        auth_db.set_key_life(cfg.key_life);

        Glob {
            auth: Arc::new(RwLock::new(auth_db)),
            data: Arc::new(RwLock::new(Store::new(cfg.data_db_connect_string.clone()))),
            users: HashMap::new(),
            departments: HashMap::new(),
            subjects: HashMap::new(),
            addr: cfg.addr,
        }
    }

    pub fn auth(&self) -> Arc<RwLock<auth::Db>> { self.auth.clone() }
    pub fn data(&self) -> Arc<RwLock<Store>> { self.data.clone() }

    pub async fn refresh_users(&mut self) -> Result<(), String> {
        log::trace!("Glob::refresh_users() called.");
        let users = self.data.read().await.get_users().await
            .map_err(|e| format!("Error retrieving users from data DB: {}", &e))?;
        self.users = users;
        Ok(())
    }

    pub async fn refresh_departments(&mut self) -> Result<(), String> {
        log::trace!("Glob::refresh_departments() called.");
        let depts = self.data.read().await.get_departments().await
            .map_err(|e| format!("Error retrieving departments from data DB: {}", &e))?;
        self.departments = depts;
        Ok(())
    }

    pub async fn refresh_subjects(&mut self) -> Result<(), String> {
        log::trace!("Glob::refresh_subjects() called.");
        let subjects = self.data.read().await.get_subjects().await
            .map_err(|e| format!("Error retrieving subjects from data DB: {}", &e))?;
        self.subjects = subjects;
        Ok(())
    }

    /// Subjects hang off departments and teachers, so a change to them
    /// invalidates all three caches.
    pub async fn refresh_all(&mut self) -> Result<(), String> {
        self.refresh_departments().await?;
        self.refresh_subjects().await?;
        self.refresh_users().await
    }

    pub fn user_by_id(&self, id: i64) -> Option<&User> {
        self.users.values().find(|u| u.id() == id)
    }

    pub fn student_by_id(&self, id: i64) -> Option<&Student> {
        match self.user_by_id(id) {
            Some(User::Student(s)) => Some(s),
            _ => None,
        }
    }

    pub fn student_by_student_id(&self, student_id: &str) -> Option<&Student> {
        self.users.values().find_map(|u| match u {
            User::Student(s) if s.student_id == student_id => Some(s),
            _ => None,
        })
    }

    pub fn department_by_name(&self, name: &str) -> Option<&Department> {
        self.departments.values().find(|d| d.name == name)
    }

    /// Subjects assigned to the given teacher, ordered by name.
    pub fn subjects_taught_by(&self, teacher: i64) -> Vec<&Subject> {
        let mut subjects: Vec<&Subject> = self.subjects.values()
            .filter(|s| s.teacher == Some(teacher))
            .collect();
        subjects.sort_by(|a, b| a.name.cmp(&b.name));
        subjects
    }

    /**
    Find the subject called `name`. Subject names are only unique within a
    department, so a subject in `department` wins; otherwise the name must
    be unambiguous across the whole portal.
    */
    pub fn resolve_subject(
        &self,
        name: &str,
        department: Option<i64>,
    ) -> Result<&Subject, String> {
        let matches: Vec<&Subject> = self.subjects.values()
            .filter(|s| s.name == name)
            .collect();

        if let Some(dept) = department {
            if let Some(s) = matches.iter().copied().find(|s| s.department == dept) {
                return Ok(s);
            }
        }

        match matches.len() {
            0 => Err(format!("There is no subject named {:?}.", name)),
            1 => Ok(matches[0]),
            n => Err(format!(
                "{} subjects are named {:?}; unable to tell which is meant.",
                &n, name
            )),
        }
    }

    /// Ensure `teacher` (if given) is allowed to record marks in `subject`.
    pub fn check_subject_permission(
        &self,
        subject: i64,
        teacher: Option<&Teacher>,
    ) -> Result<(), GlobError> {
        if !self.subjects.contains_key(&subject) {
            return Err(GlobError::Invalid(format!("There is no subject with id {}.", &subject)));
        }
        if let Some(t) = teacher {
            if !t.subjects.contains(&subject) {
                return Err(GlobError::Forbidden(format!(
                    "{} is not assigned to subject {}.", &t.base.name, &subject
                )));
            }
        }
        Ok(())
    }

    /// Ensure no existing user already has `email`, or (if given) no other
    /// student already has `student_id`.
    fn check_unused(
        &self,
        email: &str,
        student_id: Option<&str>,
        except: Option<i64>,
    ) -> Result<(), String> {
        if let Some(u) = self.users.get(email) {
            if Some(u.id()) != except {
                return Err(format!("{:?} already belongs to a {}.", email, &u.role()));
            }
        }
        if let Some(sid) = student_id {
            if let Some(s) = self.student_by_student_id(sid) {
                if Some(s.base.id) != except {
                    return Err(format!(
                        "Student id {} already belongs to {}.", sid, &s.base.name
                    ));
                }
            }
        }
        Ok(())
    }

    /// Pair each uploaded student with the id of their department, checking
    /// for unknown departments and for duplicates within the upload or
    /// against existing users.
    pub fn resolve_student_records<'a>(
        &self,
        records: &'a [StudentRecord],
    ) -> Result<Vec<(&'a StudentRecord, Option<i64>)>, GlobError> {
        let mut emails: HashSet<&str> = HashSet::with_capacity(records.len());
        let mut student_ids: HashSet<&str> = HashSet::with_capacity(records.len());
        let mut pairs = Vec::with_capacity(records.len());

        for (n, r) in records.iter().enumerate() {
            if !emails.insert(&r.email) {
                return Err(GlobError::Invalid(format!(
                    "Student {} ({}): email {} appears more than once in the upload.",
                    n + 1, &r.student_id, &r.email
                )));
            }
            if !student_ids.insert(&r.student_id) {
                return Err(GlobError::Invalid(format!(
                    "Student {}: student id {} appears more than once in the upload.",
                    n + 1, &r.student_id
                )));
            }
            self.check_unused(&r.email, Some(r.student_id.as_str()), None)
                .map_err(|e| GlobError::Invalid(format!(
                    "Student {} ({}): {}", n + 1, &r.student_id, &e
                )))?;
            let dept = match &r.department {
                None => None,
                Some(name) => match self.department_by_name(name) {
                    Some(d) => Some(d.id),
                    None => {
                        return Err(GlobError::Invalid(format!(
                            "Student {} ({}): there is no department named {:?}.",
                            n + 1, &r.student_id, name
                        )));
                    },
                },
            };
            pairs.push((r, dept));
        }

        Ok(pairs)
    }

    /// Turn uploaded mark rows into `Mark`s, resolving student ids and
    /// subject names. If `teacher` is given, every subject must be one of
    /// theirs.
    pub fn resolve_mark_rows(
        &self,
        rows: &[MarkRow],
        teacher: Option<&Teacher>,
    ) -> Result<Vec<Mark>, GlobError> {
        let mut marks: Vec<Mark> = Vec::with_capacity(rows.len());

        for (n, r) in rows.iter().enumerate() {
            let prefix = format!("Mark {}", n + 1);
            let student = self.student_by_student_id(&r.student_id)
                .ok_or_else(|| GlobError::Invalid(format!(
                    "there is no student with id {:?}.", &r.student_id
                )).annotate(&prefix))?;
            let subject = self.resolve_subject(&r.subject, student.department)
                .map_err(|e| GlobError::Invalid(e).annotate(&prefix))?;
            self.check_subject_permission(subject.id, teacher)
                .map_err(|e| e.annotate(&prefix))?;

            let m = Mark {
                id: 0,
                student: student.base.id,
                subject: subject.id,
                test_date: r.test_date,
                marks: r.marks,
                total: r.total,
            };
            m.validate().map_err(|e| GlobError::Invalid(e).annotate(&prefix))?;
            marks.push(m);
        }

        Ok(marks)
    }

    /// Insert a user into the data DB and their credentials into the auth
    /// DB. Returns the new user's id.
    pub async fn insert_user(&self, u: &NewUser) -> Result<i64, GlobError> {
        log::trace!("Glob::insert_user( {:?} ) called.", u);

        u.validate().map_err(GlobError::Invalid)?;
        if let Some(d) = u.department {
            if !self.departments.contains_key(&d) {
                return Err(GlobError::Invalid(format!("There is no department with id {}.", &d)));
            }
        }
        let sid = match u.role {
            Role::Student => u.student_id.as_deref().map(str::trim),
            _ => None,
        };
        self.check_unused(&u.email, sid, None).map_err(GlobError::Invalid)?;

        let res = {
            let data = self.data.read().await;
            match u.role {
                Role::Admin => data.insert_admin(&u.email, &u.name).await,
                Role::Teacher => data.insert_teacher(&u.email, &u.name).await,
                Role::Student => {
                    data.insert_student(&u.email, &u.name, sid.unwrap_or_default(), u.department).await
                },
            }
        };
        let id = res.map_err(|e| GlobError::Internal(format!("Unable to insert user: {}", &e)))?;

        if let Err(e) = self.auth.read().await.add_user(&u.email, &u.password).await {
            log::error!("Error adding credentials for {:?}: {}", &u.email, &e);
            if let Err(e) = self.data.read().await.delete_user(id).await {
                log::error!(
                    "Error removing user {} after failing to add credentials: {}",
                    &id, &e
                );
            }
            return Err(GlobError::Internal(format!("Unable to store credentials: {}", &e)));
        }

        Ok(id)
    }

    pub async fn update_user(&self, u: &User) -> Result<(), GlobError> {
        log::trace!("Glob::update_user( {:?} ) called.", u);

        match self.users.get(u.email()) {
            Some(old) if old.id() == u.id() && old.role() == u.role() => {},
            _ => {
                return Err(GlobError::Invalid(format!(
                    "There is no {} with id {} and email {:?}.",
                    &u.role(), &u.id(), u.email()
                )));
            },
        }
        if let User::Student(s) = u {
            if s.student_id.trim().is_empty() {
                return Err(GlobError::Invalid("Student id must not be blank.".to_owned()));
            }
            self.check_unused(&s.base.email, Some(s.student_id.as_str()), Some(s.base.id))
                .map_err(GlobError::Invalid)?;
            if let Some(d) = s.department {
                if !self.departments.contains_key(&d) {
                    return Err(GlobError::Invalid(format!("There is no department with id {}.", &d)));
                }
            }
        }

        self.data.read().await.update_user(u).await
            .map_err(|e| GlobError::Internal(format!("Unable to update user: {}", &e)))
    }

    pub async fn delete_user(&self, email: &str) -> Result<(), GlobError> {
        log::trace!("Glob::delete_user( {:?} ) called.", email);

        let u = self.users.get(email)
            .ok_or_else(|| GlobError::Invalid(format!("There is no user with email {:?}.", email)))?;

        if u.role() == Role::Admin {
            let n_admins = self.users.values()
                .filter(|u| u.role() == Role::Admin)
                .count();
            if n_admins < 2 {
                return Err(GlobError::Invalid("Refusing to delete the only Admin.".to_owned()));
            }
        }

        self.data.read().await.delete_user(u.id()).await
            .map_err(|e| GlobError::Internal(format!("Unable to delete user: {}", &e)))?;
        self.auth.read().await.delete_user(email).await
            .map_err(|e| GlobError::Internal(format!(
                "User deleted, but unable to remove credentials: {}", &e
            )))
    }

    pub async fn reset_password(&self, email: &str, password: &str) -> Result<(), GlobError> {
        log::trace!("Glob::reset_password( {:?}, [ password ] ) called.", email);

        if password.is_empty() {
            return Err(GlobError::Invalid("Password must not be blank.".to_owned()));
        }
        if !self.users.contains_key(email) {
            return Err(GlobError::Invalid(format!("There is no user with email {:?}.", email)));
        }

        let res = self.auth.read().await.set_password(email, password).await;
        match res {
            Ok(AuthResult::Ok) => Ok(()),
            Ok(AuthResult::NoSuchUser) => {
                // The data DB has the user but the auth DB doesn't; heal it.
                log::warn!("{:?} had no credentials; adding.", email);
                self.auth.read().await.add_user(email, password).await
                    .map_err(|e| GlobError::Internal(format!("Unable to store credentials: {}", &e)))
            },
            Ok(x) => Err(GlobError::Internal(format!("Unexpected result setting password: {:?}", &x))),
            Err(e) => Err(GlobError::Internal(format!("Unable to set password: {}", &e))),
        }
    }

    /// Insert students from CSV text. Returns the number inserted.
    pub async fn upload_students(&self, csv_text: &str) -> Result<usize, GlobError> {
        log::trace!("Glob::upload_students( [ {} bytes ] ) called.", csv_text.len());

        let records = StudentRecord::vec_from_csv_reader(csv_text.as_bytes())
            .map_err(GlobError::Invalid)?;
        if records.is_empty() {
            return Err(GlobError::Invalid("Upload contains no students.".to_owned()));
        }
        let pairs = self.resolve_student_records(&records)?;

        let n = self.data.read().await.insert_students(&pairs).await
            .map_err(|e| GlobError::Internal(format!("Unable to insert students: {}", &e)))?;

        let creds: Vec<(&str, &str)> = records.iter()
            .map(|r| (r.email.as_str(), r.password.as_str()))
            .collect();
        if let Err(e) = self.auth.read().await.add_users(&creds).await {
            log::error!("Error adding credentials for uploaded students: {}", &e);
            return Err(GlobError::Internal(format!(
                "{} students inserted, but their credentials could not be stored ({}); reset their passwords.",
                &n, &e
            )));
        }

        log::info!("Uploaded {} students.", &n);
        Ok(n)
    }

    /**
    Insert marks from CSV text, then enroll each student in the subjects
    they now have marks in. Returns the number of marks inserted.

    If `teacher` is given, every mark must be in one of their subjects.
    */
    pub async fn upload_marks(
        &self,
        csv_text: &str,
        teacher: Option<&Teacher>,
    ) -> Result<usize, GlobError> {
        log::trace!("Glob::upload_marks( [ {} bytes ], {:?} ) called.", csv_text.len(), teacher);

        let rows = MarkRow::vec_from_csv_reader(csv_text.as_bytes())
            .map_err(GlobError::Invalid)?;
        if rows.is_empty() {
            return Err(GlobError::Invalid("Upload contains no marks.".to_owned()));
        }
        let marks = self.resolve_mark_rows(&rows, teacher)?;

        let data = self.data.read().await;
        let n = data.insert_marks(&marks).await
            .map_err(|e| GlobError::Internal(format!("Unable to insert marks: {}", &e)))?;

        let mut pairs: Vec<(i64, i64)> = marks.iter()
            .map(|m| (m.student, m.subject))
            .collect();
        pairs.sort();
        pairs.dedup();
        let n_new = data.enroll_many(&pairs).await
            .map_err(|e| GlobError::Internal(format!(
                "{} marks inserted, but enrollment failed: {}", &n, &e
            )))?;

        log::info!("Uploaded {} marks; {} new enrollments.", &n, &n_new);
        Ok(n)
    }

    /// Everything `add_mark` checks before it touches the database.
    pub fn check_new_mark(&self, m: &Mark, teacher: Option<&Teacher>) -> Result<(), GlobError> {
        if self.student_by_id(m.student).is_none() {
            return Err(GlobError::Invalid(format!("There is no student with id {}.", &m.student)));
        }
        self.check_subject_permission(m.subject, teacher)?;
        m.validate().map_err(GlobError::Invalid)
    }

    /**
    Record a single mark, then enroll the student in the subject.

    These are two separate writes; if the second fails the mark stays and
    the error says so. Returns the new mark's id and whether a new
    enrollment was made.
    */
    pub async fn add_mark(
        &self,
        m: &Mark,
        teacher: Option<&Teacher>,
    ) -> Result<(i64, bool), GlobError> {
        log::trace!("Glob::add_mark( {:?}, {:?} ) called.", m, teacher);

        self.check_new_mark(m, teacher)?;

        let data = self.data.read().await;
        let id = data.insert_mark(m).await
            .map_err(|e| GlobError::Internal(format!("Unable to insert mark: {}", &e)))?;
        let enrolled = data.enroll(m.student, m.subject).await
            .map_err(|e| GlobError::Internal(format!(
                "Mark {} recorded, but enrollment failed: {}", &id, &e
            )))?;

        Ok((id, enrolled))
    }

    /// Update a mark's date and score. The student and subject can't change.
    pub async fn update_mark(&self, m: &Mark, teacher: Option<&Teacher>) -> Result<(), GlobError> {
        log::trace!("Glob::update_mark( {:?}, {:?} ) called.", m, teacher);

        m.validate().map_err(GlobError::Invalid)?;

        let data = self.data.read().await;
        let old = data.get_mark(m.id).await
            .map_err(|e| GlobError::Internal(format!("Unable to read mark: {}", &e)))?
            .ok_or_else(|| GlobError::Invalid(format!("There is no mark with id {}.", &m.id)))?;
        if old.student != m.student || old.subject != m.subject {
            return Err(GlobError::Invalid(format!(
                "The student and subject of mark {} can't be changed.", &m.id
            )));
        }
        self.check_subject_permission(old.subject, teacher)?;

        data.update_mark(m).await
            .map_err(|e| GlobError::Internal(format!("Unable to update mark: {}", &e)))
    }

    pub async fn delete_mark(&self, id: i64, teacher: Option<&Teacher>) -> Result<Mark, GlobError> {
        log::trace!("Glob::delete_mark( {}, {:?} ) called.", &id, teacher);

        let data = self.data.read().await;
        let m = data.get_mark(id).await
            .map_err(|e| GlobError::Internal(format!("Unable to read mark: {}", &e)))?
            .ok_or_else(|| GlobError::Invalid(format!("There is no mark with id {}.", &id)))?;
        self.check_subject_permission(m.subject, teacher)?;

        data.delete_mark(id).await
            .map_err(|e| GlobError::Internal(format!("Unable to delete mark: {}", &e)))
    }
}

/// Loads system configuration and ensures all appropriate database tables
/// exist.
///
/// Also assures existence of default admin.
pub async fn load_configuration<P: AsRef<Path>>(path: P) -> Result<(Cfg, Glob), String> {
    let path = path.as_ref();
    let cfg = if path.exists() {
        Cfg::from_file(path)?
    } else {
        log::warn!("Config file {} not found; using defaults.", path.display());
        Cfg::default()
    };
    log::info!("Configuration:\n{:#?}", &cfg);

    let mut glob = Glob::new(&cfg);

    log::trace!("Checking state of auth DB...");
    if let Err(e) = glob.auth.read().await.ensure_db_schema().await {
        return Err(format!("Unable to ensure state of auth DB: {}", &e));
    }
    log::trace!("...auth DB okay.");

    log::trace!("Checking state of data DB...");
    if let Err(e) = glob.data.read().await.ensure_db_schema().await {
        return Err(format!("Unable to ensure state of data DB: {}", &e));
    }
    log::trace!("...data DB okay.");

    glob.refresh_users().await?;

    log::trace!("Checking existence of default Admin in data DB...");
    match glob.users.get(&cfg.default_admin_email) {
        Some(User::Admin(_)) => {},
        Some(u) => {
            return Err(format!(
                "Default Admin email {:?} belongs to a {}.",
                &cfg.default_admin_email, &u.role()
            ));
        },
        None => {
            log::info!(
                "Default Admin ({}) doesn't exist in data DB; inserting.",
                &cfg.default_admin_email
            );
            glob.data.read().await.insert_admin(
                &cfg.default_admin_email,
                &cfg.default_admin_name,
            ).await.map_err(|e| format!(
                "Error inserting default Admin into data DB: {}", &e
            ))?;
            glob.refresh_users().await?;
        },
    }
    log::trace!("Default Admin OK in data DB.");

    log::trace!("Checking existence of default Admin in auth DB...");
    let check = glob.auth.read().await.check_password(
        &cfg.default_admin_email,
        &cfg.default_admin_password,
    ).await;
    match check {
        Err(e) => {
            return Err(format!(
                "Error checking existence of default Admin in auth DB: {}", &e
            ));
        },
        Ok(AuthResult::BadPassword) => {
            log::warn!("Default Admin ({}) not using default password.", &cfg.default_admin_email);
        },
        Ok(AuthResult::NoSuchUser) => {
            log::info!(
                "Default Admin ({}) doesn't exist in auth DB; inserting.",
                &cfg.default_admin_email
            );
            glob.auth.read().await.add_user(
                &cfg.default_admin_email,
                &cfg.default_admin_password,
            ).await.map_err(|e| format!(
                "Error inserting default Admin into auth DB: {}", &e
            ))?;
        },
        Ok(AuthResult::Ok) => {
            log::trace!("Default Admin password check OK.");
        },
        Ok(x) => {
            return Err(format!(
                "Default Admin password check resulted in {:?}, which just doesn't make sense.",
                &x
            ));
        },
    }

    match glob.auth.read().await.cull_old_keys().await {
        Ok(n) => { log::trace!("Culled {} expired keys.", &n); },
        Err(e) => { log::warn!("Unable to cull expired keys: {}", &e); },
    }

    glob.refresh_departments().await?;
    log::info!("Retrieved {} departments from data DB.", glob.departments.len());
    glob.refresh_subjects().await?;
    log::info!("Retrieved {} subjects from data DB.", glob.subjects.len());
    log::info!("Retrieved {} users from data DB.", glob.users.len());

    Ok((cfg, glob))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::user::BaseUser;

    use float_cmp::approx_eq;
    use time::macros::date;

    /// A `Glob` with two departments, three subjects (two both called
    /// "Safety"), a teacher, and two students. No database required.
    pub fn sample_glob() -> Glob {
        let mut glob = Glob::new(&Cfg::default());

        for (id, name, subjects) in [(1, "Electrical", vec![10, 11]), (2, "Mechanical", vec![20])] {
            glob.departments.insert(id, Department { id, name: name.to_owned(), subjects });
        }
        for (id, name, department, teacher) in [
            (10, "Circuits", 1, Some(100)),
            (11, "Safety", 1, Some(100)),
            (20, "Safety", 2, None),
        ] {
            glob.subjects.insert(id, Subject { id, name: name.to_owned(), department, teacher });
        }

        let base = |id: i64, email: &str, role: Role, name: &str| BaseUser {
            id, email: email.to_owned(), role, name: name.to_owned(),
        };
        let users = vec![
            base(1, "admin@example.org", Role::Admin, "Admin").into_admin(),
            base(100, "berro@example.org", Role::Teacher, "Mr Berro").into_teacher(vec![10, 11]),
            base(200, "asha@example.org", Role::Student, "Asha Nair")
                .into_student("OJT001".to_owned(), Some(1), vec![10]),
            base(201, "ben@example.org", Role::Student, "Ben Okafor")
                .into_student("OJT002".to_owned(), Some(2), vec![]),
        ];
        for u in users.into_iter() {
            glob.users.insert(u.email().to_owned(), u);
        }

        glob
    }

    fn teacher(glob: &Glob) -> Teacher {
        match glob.users.get("berro@example.org") {
            Some(User::Teacher(t)) => t.clone(),
            _ => panic!("sample teacher missing"),
        }
    }

    #[test]
    fn config_from_file() {
        let cfg = Cfg::from_file("test/config.toml").unwrap();
        assert_eq!(cfg.default_admin_email, "registrar@example.org");
        assert_eq!(cfg.addr.port(), 8080);
        assert_eq!(cfg.key_life, 3600);
        assert!(cfg.data_db_connect_string.contains("ojt_store_test"));
        // Unset fields keep their defaults.
        assert_eq!(cfg.default_admin_password, Cfg::default().default_admin_password);
        assert!(!format!("{:?}", &cfg).contains(&cfg.default_admin_password));
    }

    #[test]
    fn bad_config() {
        assert!(Cfg::from_toml("host = \"not an ip\"").is_err());
        assert!(Cfg::from_toml("key_life = 0").is_err());
        assert!(Cfg::from_toml("port = \"eighty\"").is_err());
        assert!(Cfg::from_toml("").is_ok());
    }

    #[test]
    fn lookups() {
        let glob = sample_glob();
        assert_eq!(glob.student_by_student_id("OJT002").unwrap().base.id, 201);
        assert!(glob.student_by_student_id("OJT999").is_none());
        assert!(glob.student_by_id(100).is_none());
        assert_eq!(glob.department_by_name("Mechanical").unwrap().id, 2);

        let names: Vec<&str> = glob.subjects_taught_by(100).iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["Circuits", "Safety"]);
    }

    #[test]
    fn subject_resolution() {
        let glob = sample_glob();
        assert_eq!(glob.resolve_subject("Circuits", None).unwrap().id, 10);
        assert_eq!(glob.resolve_subject("Circuits", Some(2)).unwrap().id, 10);
        assert_eq!(glob.resolve_subject("Safety", Some(2)).unwrap().id, 20);
        assert_eq!(glob.resolve_subject("Safety", Some(1)).unwrap().id, 11);
        assert!(glob.resolve_subject("Safety", None).is_err());
        assert!(glob.resolve_subject("Welding", Some(1)).is_err());
    }

    #[test]
    fn student_record_resolution() {
        let mut glob = sample_glob();
        let f = std::fs::File::open("test/good_students_0.csv").unwrap();
        let recs = StudentRecord::vec_from_csv_reader(f).unwrap();

        // Asha and Ben are already here.
        let e = glob.resolve_student_records(&recs).unwrap_err();
        assert!(matches!(&e, GlobError::Invalid(msg) if msg.contains("already belongs")), "{}", &e);

        glob.users.retain(|_, u| u.role() != Role::Student);
        let pairs = glob.resolve_student_records(&recs).unwrap();
        let depts: Vec<Option<i64>> = pairs.iter().map(|(_, d)| *d).collect();
        assert_eq!(depts, vec![Some(1), Some(1), Some(2), None]);

        let mut dup = recs.clone();
        dup[1].email = dup[0].email.clone();
        assert!(glob.resolve_student_records(&dup).unwrap_err().to_string().contains("more than once"));

        let mut unknown = recs.clone();
        unknown[2].department = Some("Culinary".to_owned());
        assert!(glob.resolve_student_records(&unknown).unwrap_err().to_string().contains("Culinary"));
    }

    #[test]
    fn mark_row_resolution() {
        let glob = sample_glob();
        let rows = vec![
            MarkRow {
                student_id: "OJT001".to_owned(), subject: "Safety".to_owned(),
                test_date: date!(2024-03-04), marks: 8.0, total: 10.0,
            },
            MarkRow {
                student_id: "OJT002".to_owned(), subject: "Safety".to_owned(),
                test_date: date!(2024-03-04), marks: 9.0, total: 10.0,
            },
        ];

        // Each student's own department's "Safety".
        let marks = glob.resolve_mark_rows(&rows, None).unwrap();
        assert_eq!((marks[0].student, marks[0].subject), (200, 11));
        assert_eq!((marks[1].student, marks[1].subject), (201, 20));
        assert!(approx_eq!(f32, marks[1].percentage(), 90.0, epsilon = 0.001));

        // Mr Berro doesn't teach Mechanical's Safety.
        let t = teacher(&glob);
        let e = glob.resolve_mark_rows(&rows, Some(&t)).unwrap_err();
        assert!(matches!(&e, GlobError::Forbidden(msg) if msg.starts_with("Mark 2")), "{}", &e);
        assert!(glob.resolve_mark_rows(&rows[..1], Some(&t)).is_ok());

        let mut bad = rows.clone();
        bad[0].student_id = "OJT404".to_owned();
        assert!(glob.resolve_mark_rows(&bad, None).is_err());
        bad[0].student_id = "OJT001".to_owned();
        bad[0].marks = 11.0;
        assert!(matches!(glob.resolve_mark_rows(&bad, None), Err(GlobError::Invalid(_))));
    }

    #[test]
    fn subject_permission() {
        let glob = sample_glob();
        let t = teacher(&glob);
        assert!(glob.check_subject_permission(10, Some(&t)).is_ok());
        assert!(matches!(
            glob.check_subject_permission(20, Some(&t)),
            Err(GlobError::Forbidden(_))
        ));
        assert!(glob.check_subject_permission(20, None).is_ok());
        assert!(matches!(
            glob.check_subject_permission(99, None),
            Err(GlobError::Invalid(_))
        ));
    }

    #[test]
    fn new_mark_checks() {
        let glob = sample_glob();
        let t = teacher(&glob);
        let mut m = Mark {
            id: 0, student: 200, subject: 10, test_date: date!(2024-03-04),
            marks: 8.0, total: 10.0,
        };
        assert!(glob.check_new_mark(&m, Some(&t)).is_ok());

        m.subject = 20;
        assert!(matches!(glob.check_new_mark(&m, Some(&t)), Err(GlobError::Forbidden(_))));
        assert!(glob.check_new_mark(&m, None).is_ok());

        m.marks = 30.0;
        assert!(matches!(glob.check_new_mark(&m, None), Err(GlobError::Invalid(_))));
        m.marks = 8.0;
        m.student = 100;
        assert!(matches!(glob.check_new_mark(&m, None), Err(GlobError::Invalid(_))));
    }

    #[test]
    fn unused_emails_and_student_ids() {
        let glob = sample_glob();
        assert!(glob.check_unused("new@example.org", Some("OJT777"), None).is_ok());
        let e = glob.check_unused("berro@example.org", None, None).unwrap_err();
        assert!(e.contains("Teacher"), "{}", &e);
        assert!(glob.check_unused("new@example.org", Some("OJT001"), None).is_err());
        // A student keeps their own email and student id.
        assert!(glob.check_unused("asha@example.org", Some("OJT001"), Some(200)).is_ok());
        assert!(glob.check_unused("asha@example.org", Some("OJT002"), Some(200)).is_err());
    }

    #[tokio::test]
    async fn user_writes_checked_before_database() {
        let glob = sample_glob();

        let e = glob.delete_user("admin@example.org").await.unwrap_err();
        assert_eq!(e, GlobError::Invalid("Refusing to delete the only Admin.".to_owned()));
        assert!(matches!(glob.delete_user("nobody@example.org").await, Err(GlobError::Invalid(_))));

        let nu = NewUser {
            email: "ben@example.org".to_owned(),
            name: "Ben Again".to_owned(),
            role: Role::Teacher,
            password: "pw".to_owned(),
            student_id: None,
            department: None,
        };
        let e = glob.insert_user(&nu).await.unwrap_err();
        assert!(matches!(&e, GlobError::Invalid(msg) if msg.contains("Student")), "{}", &e);

        assert!(matches!(glob.reset_password("asha@example.org", "").await, Err(GlobError::Invalid(_))));
        assert!(matches!(glob.upload_students("# nothing\n").await, Err(GlobError::Invalid(_))));
        assert!(matches!(
            glob.upload_marks("OJT001, Circuits, 2024-03-04, inf, inf\n", None).await,
            Err(GlobError::Invalid(_))
        ));
    }
}
