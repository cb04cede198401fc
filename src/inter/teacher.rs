/*!
Subcrate for interoperation with Teacher users.

Teachers can only see and touch marks in the subjects assigned to them.
*/
use axum::{
    extract::Extension,
    http::header::HeaderMap,
    response::Response,
};
use serde::Serialize;

use crate::{
    academic::Subject,
    config::Glob,
    marks::{self, Mark, Pivot, PivotKey, SubjectSummary, WeekAverage},
    user::*,
};
use super::*;

pub async fn api(
    headers: HeaderMap,
    body: Option<String>,
    Extension(glob): Extension<Arc<RwLock<Glob>>>
) -> Response {

    let u = {
        let glob = glob.read().await;
        match request_user(&headers, &glob) {
            Ok(u) => u,
            Err(r) => { return r; },
        }
    };

    let t = match &u {
        User::Teacher(t) => t.clone(),
        _ => {
            return respond_forbidden(
                "Only Teachers may make requests here.".to_owned()
            );
        },
    };

    let action = match request_action(&headers) {
        Ok(act) => act,
        Err(r) => { return r; },
    };

    match action {
        "populate-subjects" => populate_subjects(&t, glob.clone()).await,
        "populate-students" => populate_students(&t, glob.clone()).await,
        "populate-marks" => populate_marks(&t, glob.clone()).await,
        "add-marks" => add_marks(&t, body, glob.clone()).await,
        "update-marks" => update_marks(&t, body, glob.clone()).await,
        "delete-marks" => delete_marks(&t, body, glob.clone()).await,
        "upload-marks" => upload_marks(&t, body, glob.clone()).await,
        "subject-report" => subject_report(&t, body, glob.clone()).await,
        "populate-schedules" => populate_schedules(&t, glob.clone()).await,
        "change-password" => change_password(&u, body, glob.clone()).await,
        x => respond_bad_request(
            format!("{:?} is not a recognized x-ojt-action value.", &x)
        ),
    }
}

async fn populate_subjects(t: &Teacher, glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("populate_subjects( {:?}, Glob ) called.", &t.base.email);

    let glob = glob.read().await;
    let subjects: Vec<&Subject> = glob.subjects_taught_by(t.base.id);
    action_response("populate-subjects", &subjects)
}

/// Students in the departments of `t`'s subjects, plus any student
/// already enrolled in one of them; ordered by name.
fn students_of<'a>(glob: &'a Glob, t: &Teacher) -> Vec<&'a Student> {
    let depts: Vec<i64> = glob.subjects_taught_by(t.base.id).iter()
        .map(|s| s.department)
        .collect();

    let mut students: Vec<&Student> = glob.users.values()
        .filter_map(|u| match u {
            User::Student(s) => Some(s),
            _ => None,
        })
        .filter(|s| {
            s.department.map(|d| depts.contains(&d)).unwrap_or(false)
            || s.subjects.iter().any(|subj| t.subjects.contains(subj))
        })
        .collect();
    students.sort_by(|a, b| a.base.name.cmp(&b.base.name));
    students
}

async fn populate_students(t: &Teacher, glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("populate_students( {:?}, Glob ) called.", &t.base.email);

    let glob = glob.read().await;
    action_response("populate-students", &students_of(&glob, t))
}

async fn populate_marks(t: &Teacher, glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("populate_marks( {:?}, Glob ) called.", &t.base.email);

    let res = glob.read().await.data().read().await
        .get_marks_by_subjects(&t.subjects).await;
    match res {
        Ok(marks) => action_response("populate-marks", &marks),
        Err(e) => {
            log::error!(
                "Error retrieving marks in subjects {:?} from database: {}",
                &t.subjects, &e
            );
            text_500(Some("Unable to retrieve marks from database.".to_owned()))
        },
    }
}

async fn add_marks(t: &Teacher, body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let m: Mark = match json_body(body) {
        Ok(m) => m,
        Err(r) => { return r; },
    };

    let res = glob.read().await.add_mark(&m, Some(t)).await;
    match res {
        Ok((_, false)) => {},
        Ok((_, true)) => {
            if let Err(e) = glob.write().await.refresh_users().await {
                log::error!("Error refreshing user hash from database: {}", &e);
                return text_500(Some("Unable to reread users from database.".to_owned()));
            }
        },
        Err(e) => {
            log::warn!("Error adding mark {:?}: {}", &m, &e);
            return respond_glob_error(e);
        },
    }

    populate_marks(t, glob).await
}

async fn update_marks(t: &Teacher, body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let m: Mark = match json_body(body) {
        Ok(m) => m,
        Err(r) => { return r; },
    };

    if let Err(e) = glob.read().await.update_mark(&m, Some(t)).await {
        log::warn!("Error updating mark {:?}: {}", &m, &e);
        return respond_glob_error(e);
    }

    populate_marks(t, glob).await
}

async fn delete_marks(t: &Teacher, body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let id: i64 = match json_body(body) {
        Ok(id) => id,
        Err(r) => { return r; },
    };

    if let Err(e) = glob.read().await.delete_mark(id, Some(t)).await {
        log::warn!("Error deleting mark {}: {}", &id, &e);
        return respond_glob_error(e);
    }

    populate_marks(t, glob).await
}

async fn upload_marks(t: &Teacher, body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let body = match require_body(body, "CSV") {
        Ok(body) => body,
        Err(r) => { return r; },
    };

    {
        let glob = glob.read().await;
        if let Err(e) = glob.upload_marks(&body, Some(t)).await {
            log::warn!(
                "Error uploading marks via CSV: {}\n\nCSV text:\n\n{}\n",
                &e, &body
            );
            return respond_glob_error(e);
        }
    }
    if let Err(e) = glob.write().await.refresh_users().await {
        log::error!("Error refreshing user hash from database: {}", &e);
        return text_500(Some("Unable to reread users from database.".to_owned()));
    }

    populate_marks(t, glob).await
}

#[derive(Debug, Serialize)]
struct SubjectReport {
    subject: i64,
    name: String,
    summary: Option<SubjectSummary>,
    /// Students down, test dates across.
    pivot: Pivot,
    weekly: Vec<WeekAverage>,
}

fn make_subject_report(glob: &Glob, subject: &Subject, marks: &[Mark]) -> SubjectReport {
    let mut pivot = marks::pivot(marks, PivotKey::Student);
    pivot.label_rows(|id| glob.student_by_id(id).map(|s| s.base.name.clone()));

    SubjectReport {
        subject: subject.id,
        name: subject.name.clone(),
        summary: SubjectSummary::from_marks(marks).pop(),
        pivot,
        weekly: marks::weekly_averages(marks),
    }
}

async fn subject_report(t: &Teacher, body: Option<String>, glob: Arc<RwLock<Glob>>) -> Response {
    let id: i64 = match json_body(body) {
        Ok(id) => id,
        Err(r) => { return r; },
    };
    log::trace!("subject_report( {:?}, {} ) called.", &t.base.email, &id);

    let glob = glob.read().await;
    if let Err(e) = glob.check_subject_permission(id, Some(t)) {
        return respond_glob_error(e);
    }
    let subject = match glob.subjects.get(&id) {
        Some(s) => s,
        None => { return respond_bad_request(format!("There is no subject with id {}.", &id)); },
    };

    let res = glob.data().read().await.get_marks_by_subjects(&[id]).await;
    let marks = match res {
        Ok(marks) => marks,
        Err(e) => {
            log::error!("Error retrieving marks in subject {}: {}", &id, &e);
            return text_500(Some("Unable to retrieve marks from database.".to_owned()));
        },
    };

    action_response("subject-report", &make_subject_report(&glob, subject, &marks))
}

async fn populate_schedules(t: &Teacher, glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("populate_schedules( {:?}, Glob ) called.", &t.base.email);

    let res = glob.read().await.data().read().await.get_schedules().await;
    match res {
        Ok(mut schedules) => {
            schedules.retain(|s| t.subjects.contains(&s.subject));
            action_response("populate-schedules", &schedules)
        },
        Err(e) => {
            log::error!("Error retrieving schedules from database: {}", &e);
            text_500(Some("Unable to retrieve schedules from database.".to_owned()))
        },
    }
}
