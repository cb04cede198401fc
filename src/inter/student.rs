/*!
Subcrate for interoperation with Student users.
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
    marks::{self, Mark, Pivot, PivotKey, SubjectSummary, TrendPoint, WeekAverage},
    user::*,
    DATE_FMT,
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

    let s = match &u {
        User::Student(s) => s.clone(),
        _ => {
            return respond_forbidden(
                "Only Students may make requests here.".to_owned()
            );
        },
    };

    let action = match request_action(&headers) {
        Ok(act) => act,
        Err(r) => { return r; },
    };

    match action {
        "populate-subjects" => populate_subjects(&s, glob.clone()).await,
        "populate-marks" => populate_marks(&s, glob.clone()).await,
        "report" => report(&s, glob.clone()).await,
        "report-card" => report_card(&s, glob.clone()).await,
        "populate-schedules" => populate_schedules(&s, glob.clone()).await,
        "change-password" => change_password(&u, body, glob.clone()).await,
        x => respond_bad_request(
            format!("{:?} is not a recognized x-ojt-action value.", &x)
        ),
    }
}

fn enrolled_subjects<'a>(glob: &'a Glob, s: &Student) -> Vec<&'a Subject> {
    let mut subjects: Vec<&Subject> = s.subjects.iter()
        .filter_map(|id| glob.subjects.get(id))
        .collect();
    subjects.sort_by(|a, b| a.name.cmp(&b.name));
    subjects
}

fn subject_name(glob: &Glob, id: i64) -> String {
    match glob.subjects.get(&id) {
        Some(s) => s.name.clone(),
        None => format!("[ subject {} ]", &id),
    }
}

async fn populate_subjects(s: &Student, glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("populate_subjects( {:?}, Glob ) called.", &s.base.email);

    let glob = glob.read().await;
    action_response("populate-subjects", &enrolled_subjects(&glob, s))
}

async fn get_marks(s: &Student, glob: &Arc<RwLock<Glob>>) -> Result<Vec<Mark>, Response> {
    let res = glob.read().await.data().read().await
        .get_marks_by_student(s.base.id).await;
    res.map_err(|e| {
        log::error!("Error retrieving marks for student {}: {}", &s.base.id, &e);
        text_500(Some("Unable to retrieve marks from database.".to_owned()))
    })
}

async fn populate_marks(s: &Student, glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("populate_marks( {:?}, Glob ) called.", &s.base.email);

    match get_marks(s, &glob).await {
        Ok(marks) => action_response("populate-marks", &marks),
        Err(r) => r,
    }
}

#[derive(Debug, Serialize)]
struct NamedSummary {
    name: String,
    #[serde(flatten)]
    summary: SubjectSummary,
}

#[derive(Debug, Serialize)]
struct Trend {
    subject: i64,
    name: String,
    points: Vec<TrendPoint>,
}

#[derive(Debug, Serialize)]
struct StudentReport {
    summaries: Vec<NamedSummary>,
    /// Subjects down, test dates across.
    pivot: Pivot,
    weekly: Vec<WeekAverage>,
    trends: Vec<Trend>,
}

fn make_report(glob: &Glob, marks: &[Mark]) -> StudentReport {
    let summaries: Vec<NamedSummary> = SubjectSummary::from_marks(marks)
        .into_iter()
        .map(|summary| NamedSummary {
            name: subject_name(glob, summary.subject),
            summary,
        }).collect();

    let trends: Vec<Trend> = summaries.iter()
        .map(|ns| Trend {
            subject: ns.summary.subject,
            name: ns.name.clone(),
            points: marks::subject_trend(marks, ns.summary.subject),
        }).collect();

    let mut pivot = marks::pivot(marks, PivotKey::Subject);
    pivot.label_rows(|id| glob.subjects.get(&id).map(|s| s.name.clone()));

    StudentReport {
        summaries,
        pivot,
        weekly: marks::weekly_averages(marks),
        trends,
    }
}

async fn report(s: &Student, glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("report( {:?}, Glob ) called.", &s.base.email);

    let marks = match get_marks(s, &glob).await {
        Ok(marks) => marks,
        Err(r) => { return r; },
    };

    let glob = glob.read().await;
    action_response("report", &make_report(&glob, &marks))
}

#[derive(Debug, Serialize)]
struct CardRow {
    name: String,
    n_tests: usize,
    marks: String,
    total: String,
    percentage: String,
    best: String,
    worst: String,
}

#[derive(Debug, Serialize)]
struct ReportCard {
    name: String,
    student_id: String,
    department: Option<String>,
    rows: Vec<CardRow>,
    overall: Option<String>,
    date: String,
}

fn make_report_card(glob: &Glob, s: &Student, marks: &[Mark]) -> ReportCard {
    let summaries = SubjectSummary::from_marks(marks);

    let (sum, tot) = summaries.iter()
        .fold((0.0_f32, 0.0_f32), |(m, t), ss| (m + ss.marks, t + ss.total));
    let overall = if tot > 0.0 {
        Some(format!("{:.1}", 100.0 * sum / tot))
    } else {
        None
    };

    let mut rows: Vec<CardRow> = summaries.iter()
        .map(|ss| CardRow {
            name: subject_name(glob, ss.subject),
            n_tests: ss.n_tests,
            marks: format!("{}", ss.marks),
            total: format!("{}", ss.total),
            percentage: format!("{:.1}", ss.percentage),
            best: format!("{:.1}", ss.best),
            worst: format!("{:.1}", ss.worst),
        }).collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));

    let date = match crate::now().format(DATE_FMT) {
        Ok(d) => d,
        Err(e) => {
            log::error!("Error formatting today's date: {}", &e);
            String::new()
        },
    };

    ReportCard {
        name: s.base.name.clone(),
        student_id: s.student_id.clone(),
        department: s.department
            .and_then(|d| glob.departments.get(&d))
            .map(|d| d.name.clone()),
        rows,
        overall,
        date,
    }
}

async fn report_card(s: &Student, glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("report_card( {:?}, Glob ) called.", &s.base.email);

    let marks = match get_marks(s, &glob).await {
        Ok(marks) => marks,
        Err(r) => { return r; },
    };

    let card = {
        let glob = glob.read().await;
        make_report_card(&glob, s, &marks)
    };

    serve_template(
        StatusCode::OK,
        "report_card",
        &card,
        vec![(
            HeaderName::from_static("x-ojt-action"),
            HeaderValue::from_static("report-card"),
        )],
    )
}

async fn populate_schedules(s: &Student, glob: Arc<RwLock<Glob>>) -> Response {
    log::trace!("populate_schedules( {:?}, Glob ) called.", &s.base.email);

    let dept = match s.department {
        Some(d) => d,
        None => {
            return action_response("populate-schedules", &Vec::<i64>::new());
        },
    };

    let res = glob.read().await.data().read().await
        .get_schedules_by_department(dept).await;
    match res {
        Ok(schedules) => action_response("populate-schedules", &schedules),
        Err(e) => {
            log::error!("Error retrieving schedules for department {}: {}", &dept, &e);
            text_500(Some("Unable to retrieve schedules from database.".to_owned()))
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_glob;
    use crate::inter::tests::headers;

    use float_cmp::approx_eq;
    use time::macros::date;

    fn asha(glob: &Glob) -> Student {
        match &glob.users["asha@example.org"] {
            User::Student(s) => s.clone(),
            _ => panic!("sample student missing"),
        }
    }

    fn sample_marks() -> Vec<Mark> {
        let mk = |subject, test_date, marks, total| Mark {
            id: 0, student: 200, subject, test_date, marks, total,
        };
        vec![
            mk(10, date!(2024-03-04), 8.0, 10.0),
            mk(11, date!(2024-03-04), 15.0, 20.0),
            mk(10, date!(2024-03-12), 6.0, 10.0),
        ]
    }

    #[test]
    fn report_shapes() {
        let glob = sample_glob();
        let r = make_report(&glob, &sample_marks());

        let names: Vec<&str> = r.summaries.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Circuits", "Safety"]);
        assert!(approx_eq!(f32, r.summaries[0].summary.percentage, 70.0, epsilon = 0.001));

        assert_eq!(r.pivot.dates.len(), 2);
        assert_eq!(r.pivot.rows[1].cells, vec![Some(75.0), None]);
        assert_eq!(r.weekly.len(), 2);
        assert_eq!(r.trends[0].points.len(), 2);
        assert_eq!(r.trends[1].points.len(), 1);
    }

    #[test]
    fn enrolled_only() {
        let glob = sample_glob();
        let s = asha(&glob);
        let subjects = enrolled_subjects(&glob, &s);
        assert_eq!(subjects.len(), 1);
        assert_eq!(subjects[0].name, "Circuits");
    }

    #[test]
    fn render_report_card() {
        init("templates").unwrap();
        let glob = sample_glob();
        let s = asha(&glob);

        let card = make_report_card(&glob, &s, &sample_marks());
        assert_eq!(card.overall.as_deref(), Some("72.5"));
        assert_eq!(card.department.as_deref(), Some("Electrical"));

        let html = TEMPLATES.get().unwrap().render("report_card", &card).unwrap();
        assert!(html.contains("Asha Nair"));
        assert!(html.contains("OJT001"));
        assert!(html.contains("Circuits"));
        assert!(html.contains("72.5"));

        let blank = make_report_card(&glob, &s, &[]);
        assert!(blank.overall.is_none());
        let html = TEMPLATES.get().unwrap().render("report_card", &blank).unwrap();
        assert!(html.contains("No marks"));
    }

    #[tokio::test]
    async fn only_students_get_in() {
        let glob = Arc::new(RwLock::new(sample_glob()));

        let h = headers(&[
            ("x-ojt-uname", "berro@example.org"),
            ("x-ojt-action", "populate-subjects"),
        ]);
        let r = api(h, None, Extension(glob.clone())).await;
        assert_eq!(r.status(), StatusCode::FORBIDDEN);

        let h = headers(&[
            ("x-ojt-uname", "asha@example.org"),
            ("x-ojt-action", "populate-subjects"),
        ]);
        let r = api(h, None, Extension(glob.clone())).await;
        assert_eq!(r.status(), StatusCode::OK);

        let h = headers(&[("x-ojt-uname", "asha@example.org")]);
        let r = api(h, None, Extension(glob)).await;
        assert_eq!(r.status(), StatusCode::BAD_REQUEST);
    }
}
