use std::io::Read;
use std::thread::{self, JoinHandle};

use anyhow::Result;
use simexec_control::{ControlPlane, Error, HttpClient, Status};
use tiny_http::{Response, Server};

/// A request as seen by the test server: (method, url, body).
type Seen = (String, String, Vec<u8>);

fn start_server() -> Result<(Server, String)> {
    let server = Server::http("127.0.0.1:0").map_err(|e| anyhow::anyhow!("{e}"))?;
    let addr = server
        .server_addr()
        .to_ip()
        .ok_or_else(|| anyhow::anyhow!("server has no ip address"))?;
    Ok((server, format!("http://{addr}")))
}

/// Answer one request per entry in `responses`, in order, and hand back what was received.
fn serve(server: Server, responses: Vec<(u16, Vec<u8>)>) -> JoinHandle<Vec<Seen>> {
    thread::spawn(move || {
        let mut seen = Vec::with_capacity(responses.len());
        for (code, body) in responses {
            let mut request = server.recv().expect("receiving request");
            let mut buf = Vec::new();
            request
                .as_reader()
                .read_to_end(&mut buf)
                .expect("reading request body");
            seen.push((request.method().to_string(), request.url().to_owned(), buf));
            request
                .respond(Response::from_data(body).with_status_code(code))
                .expect("sending response");
        }
        seen
    })
}

#[test]
fn test_report_posts_form() -> Result<()> {
    let (server, base) = start_server()?;
    let handle = serve(server, vec![(200, Vec::new())]);

    let client = HttpClient::new(&base)?;
    client.report("abc-123", Status::Running, "hello world")?;

    let seen = handle.join().expect("server thread");
    let (method, url, body) = &seen[0];
    let body = String::from_utf8_lossy(body);
    assert_eq!(method, "POST");
    assert_eq!(url, "/run/update");
    assert!(body.contains("uuid=abc-123"), "{body}");
    assert!(body.contains("status=running"), "{body}");
    assert!(body.contains("message=hello+world"), "{body}");
    Ok(())
}

#[test]
fn test_report_rejected() -> Result<()> {
    let (server, base) = start_server()?;
    let handle = serve(server, vec![(500, Vec::new())]);

    let client = HttpClient::new(&base)?;
    let err = client
        .report("abc", Status::Success, "done")
        .expect_err("report should fail");
    assert_eq!(err.code(), Some(500));
    handle.join().expect("server thread");
    Ok(())
}

#[test]
fn test_download_streams_package() -> Result<()> {
    let (server, base) = start_server()?;
    let package = format!(r#"{{"url": "{base}/files/", "filename": "abc.tar.gz"}}"#);
    let handle = serve(
        server,
        vec![
            (200, package.into_bytes()),
            (200, b"not really a tarball".to_vec()),
            (200, Vec::new()),
        ],
    );

    let client = HttpClient::new(&format!("{base}/"))?;
    let mut dest = Vec::new();
    let n_bytes = client.download("abc", &mut dest)?;

    assert_eq!(n_bytes, 20);
    assert_eq!(dest, b"not really a tarball");

    let seen = handle.join().expect("server thread");
    let urls: Vec<&str> = seen.iter().map(|(_, url, _)| url.as_str()).collect();
    assert_eq!(urls, ["/package/create", "/files/abc.tar.gz", "/package/delete/abc"]);
    assert!(String::from_utf8_lossy(&seen[0].2).contains("uuid=abc"));
    Ok(())
}

#[test]
fn test_download_not_found() -> Result<()> {
    let (server, base) = start_server()?;
    let handle = serve(server, vec![(404, Vec::new())]);

    let client = HttpClient::new(&base)?;
    let mut dest = Vec::new();
    match client.download("abc", &mut dest) {
        Err(Error::Download { code, resource }) => {
            assert_eq!(code, 404);
            assert!(resource.ends_with("abc.tar.gz"), "{resource}");
        }
        other => panic!("expected download error, got {other:?}"),
    }
    assert!(dest.is_empty());
    handle.join().expect("server thread");
    Ok(())
}

#[test]
fn test_upload_parses_result() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let archive = dir.path().join("abc.tar.gz");
    std::fs::write(&archive, b"archive bytes")?;

    let (server, base) = start_server()?;
    let handle = serve(
        server,
        vec![(200, br#"{"url": "http://results/abc"}"#.to_vec())],
    );

    let client = HttpClient::new(&base)?;
    let receipt = client.upload(&archive)?;
    assert_eq!(receipt.result["url"], "http://results/abc");

    let seen = handle.join().expect("server thread");
    let (_, url, body) = &seen[0];
    let body = String::from_utf8_lossy(body);
    assert_eq!(url, "/run/upload");
    assert!(body.contains("name=\"file\""), "{body}");
    assert!(body.contains("archive bytes"), "{body}");
    Ok(())
}

#[test]
fn test_upload_failure_carries_code_and_path() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let archive = dir.path().join("abc.tar.gz");
    std::fs::write(&archive, b"archive bytes")?;

    let (server, base) = start_server()?;
    let handle = serve(server, vec![(503, Vec::new())]);

    let client = HttpClient::new(&base)?;
    let err = client.upload(&archive).expect_err("upload should fail");
    assert_eq!(err.code(), Some(503));
    assert!(err.to_string().contains("unable to upload (error 503)"));
    assert!(err.to_string().contains("abc.tar.gz"));
    handle.join().expect("server thread");
    Ok(())
}
