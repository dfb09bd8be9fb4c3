/// HTTP client tests against a throwaway `tiny_http` backend.
///
/// Each test starts a server on `127.0.0.1:0` that answers a fixed number of
/// requests with canned responses and reports what it received.
use std::io::Read;
use std::sync::mpsc::{self, Receiver};
use std::thread;

use tiny_http::{Header, Response, Server};

use pneumo::api::{ApiError, DiagnosisBackend, HttpBackend};
use pneumo::model::{Gender, ImageFile, SubmissionPayload};
use pneumo::multipart;

// ---------------------------------------------------------------------------
// Fake server
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Received {
    method: String,
    url: String,
    content_type: Option<String>,
    body: Vec<u8>,
}

/// Serve `replies` in order, then stop. Returns the base URL and a channel
/// of received requests.
fn fake_backend(replies: Vec<(u16, &'static str)>) -> (String, Receiver<Received>) {
    let server = Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr().to_ip().unwrap();
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        for (status, body) in replies {
            let Ok(mut request) = server.recv() else {
                return;
            };
            let mut buf = Vec::new();
            let _ = request.as_reader().read_to_end(&mut buf);
            let content_type = request
                .headers()
                .iter()
                .find(|h| h.field.equiv("Content-Type"))
                .map(|h| h.value.as_str().to_string());
            let _ = tx.send(Received {
                method: request.method().to_string(),
                url: request.url().to_string(),
                content_type,
                body: buf,
            });

            let header = Header::from_bytes("Content-Type", "application/json").unwrap();
            let response = Response::from_string(body)
                .with_status_code(status)
                .with_header(header);
            let _ = request.respond(response);
        }
    });

    (format!("http://{addr}"), rx)
}

fn payload() -> SubmissionPayload {
    SubmissionPayload {
        patient_name: "za".to_string(),
        patient_id: "PID-111".to_string(),
        age: 21,
        gender: Gender::Female,
        file: ImageFile::new("chest.jpg", "image/jpeg", vec![0xff, 0xd8, 0xff, 0x00, 0x0d, 0x0a]),
        preview_url: "/preview/1".to_string(),
    }
}

// ---------------------------------------------------------------------------
// Prediction / explanation
// ---------------------------------------------------------------------------

#[test]
fn predict_sends_multipart_intake_form() {
    let (base_url, rx) = fake_backend(vec![(200, r#"{"label":"PNEUMONIA","confidence":92}"#)]);
    let backend = HttpBackend::new(&base_url);

    let prediction = backend.submit_prediction(&payload()).unwrap();
    assert_eq!(prediction.label, "PNEUMONIA");
    assert_eq!(prediction.confidence, 92.0);

    let received = rx.recv().unwrap();
    assert_eq!(received.method, "POST");
    assert_eq!(received.url, "/predict");
    let boundary = received
        .content_type
        .as_deref()
        .and_then(multipart::boundary_from_content_type)
        .unwrap();
    let fields = multipart::parse(&received.body, &boundary).unwrap();

    let file = fields.iter().find(|f| f.name == "file").unwrap();
    assert_eq!(file.file_name.as_deref(), Some("chest.jpg"));
    assert_eq!(file.content_type.as_deref(), Some("image/jpeg"));
    assert_eq!(file.data, vec![0xff, 0xd8, 0xff, 0x00, 0x0d, 0x0a]);

    let text = |name: &str| fields.iter().find(|f| f.name == name).map(|f| f.text().into_owned());
    assert_eq!(text("patientName").as_deref(), Some("za"));
    assert_eq!(text("patientId").as_deref(), Some("PID-111"));
    assert_eq!(text("patientAge").as_deref(), Some("21"));
    assert_eq!(text("patientGender").as_deref(), Some("Female"));
}

#[test]
fn explain_decodes_images() {
    let (base_url, rx) = fake_backend(vec![(
        200,
        r#"{"label":"PNEUMONIA","confidence":92,"gradcam":"url1","lime":"url2","occlusion":"url3"}"#,
    )]);
    let backend = HttpBackend::new(&base_url);

    let explanation = backend.submit_explanation(&payload()).unwrap();
    assert_eq!(explanation.gradcam.as_deref(), Some("url1"));
    assert_eq!(explanation.lime.as_deref(), Some("url2"));
    assert_eq!(explanation.occlusion.as_deref(), Some("url3"));
    assert_eq!(rx.recv().unwrap().url, "/explain");
}

#[test]
fn explain_accepts_images_only_body() {
    let (base_url, _rx) = fake_backend(vec![(200, r#"{"gradcam":"url1","lime":"url2","occlusion":"url3"}"#)]);
    let backend = HttpBackend::new(&base_url);

    let explanation = backend.submit_explanation(&payload()).unwrap();
    assert_eq!(explanation.label, None);
    assert_eq!(explanation.confidence, None);
    assert_eq!(explanation.gradcam.as_deref(), Some("url1"));
    assert_eq!(explanation.occlusion.as_deref(), Some("url3"));
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[test]
fn error_bodies_become_messages() {
    let (base_url, _rx) = fake_backend(vec![
        (400, r#"{"error":"No file part in the request"}"#),
        (422, r#"{"detail":"patientAge must be an integer"}"#),
        (500, "Internal Server Error"),
    ]);
    let backend = HttpBackend::new(&base_url);

    let err = backend.submit_prediction(&payload()).unwrap_err();
    assert_eq!(err.to_string(), "No file part in the request");
    assert_eq!(err.status(), Some(400));

    let err = backend.submit_prediction(&payload()).unwrap_err();
    assert_eq!(err.to_string(), "patientAge must be an integer");

    let err = backend.submit_explanation(&payload()).unwrap_err();
    assert_eq!(err.to_string(), "Request failed with status 500");
}

#[test]
fn success_status_with_error_field_is_a_failure() {
    let (base_url, _rx) = fake_backend(vec![(200, r#"{"error":"model not loaded"}"#)]);
    let backend = HttpBackend::new(&base_url);

    let err = backend.submit_prediction(&payload()).unwrap_err();
    assert_eq!(err, ApiError::Backend("model not loaded".to_string()));
}

#[test]
fn unreachable_backend_is_a_transport_error() {
    // Bind and drop to find a port nobody listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let backend = HttpBackend::new(&format!("http://127.0.0.1:{port}"));

    let err = backend.fetch_history("PID-111").unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)), "got {err:?}");
    assert!(!backend.is_reachable());
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

#[test]
fn history_passes_patient_id_query() {
    let (base_url, rx) = fake_backend(vec![
        (
            200,
            r#"{"reports":[{"reportId":"r1","patientId":"PID 7","patientAge":21,"diagnosis":"NORMAL","confidence":88.5,"createdAt":"2026-01-01T10:00:00Z"}]}"#,
        ),
        (200, r#"{"reports":[]}"#),
    ]);
    let backend = HttpBackend::new(&base_url);

    let response = backend.fetch_history("PID 7").unwrap();
    assert_eq!(response.reports.len(), 1);
    let record = &response.reports[0];
    assert_eq!(record.key(), "r1");
    assert_eq!(record.patient_age.as_deref(), Some("21"));
    assert_eq!(record.confidence_display(), "88.5%");
    assert!(!record.has_explanations());

    let received = rx.recv().unwrap();
    assert_eq!(received.method, "GET");
    assert!(
        received.url == "/patients/history?patientId=PID%207"
            || received.url == "/patients/history?patientId=PID+7",
        "unexpected url {}",
        received.url
    );

    backend.fetch_history("").unwrap();
    assert_eq!(rx.recv().unwrap().url, "/patients/history");
}

#[test]
fn reachability_counts_any_http_response() {
    let (base_url, _rx) = fake_backend(vec![(404, r#"{"error":"not found"}"#)]);
    assert!(HttpBackend::new(&base_url).is_reachable());
}
