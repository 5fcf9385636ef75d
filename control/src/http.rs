use std::io::Write;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::{multipart, Client};
use reqwest::StatusCode;
use serde::Deserialize;

use crate::{ControlPlane, Error, Status, UploadReceipt};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const ARCHIVE_MIME: &str = "application/x-gzip";

/// Location of a packaged input bundle, as returned by `package/create`.
#[derive(Debug, Deserialize)]
struct Package {
    url: String,
    filename: String,
}

/// `ControlPlane` implementation that talks to the API server over HTTP.
///
/// All calls block the calling thread. Transfers have no overall timeout,
/// since bundles and results can be large; only connecting is bounded.
#[derive(Debug, Clone)]
pub struct HttpClient {
    server: String,
    http: Client,
}

impl HttpClient {
    /// Create a client for the API server rooted at `server`.
    pub fn new(server: &str) -> Result<Self, Error> {
        let http = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None::<Duration>)
            .build()?;
        Ok(Self {
            server: server.trim_end_matches('/').to_owned(),
            http,
        })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.server, path)
    }

    /// Ask the server to package the inputs for `run_id`.
    fn create_package(&self, run_id: &str) -> Result<Package, Error> {
        let url = self.endpoint("package/create");
        log::debug!("requesting package for {run_id} from {url}");
        let resp = self
            .http
            .post(&url)
            .form(&[("uuid", run_id), ("filename", "")])
            .send()?;

        if resp.status() != StatusCode::OK {
            return Err(Error::Download {
                code: resp.status().as_u16(),
                resource: format!("{url}:{run_id}.tar.gz"),
            });
        }
        let body = resp.text()?;
        serde_json::from_str(&body).map_err(Error::Package)
    }

    /// The package is a one-shot artifact; failing to delete it is not our problem.
    fn delete_package(&self, run_id: &str) {
        let url = self.endpoint(&format!("package/delete/{run_id}"));
        match self.http.post(&url).send() {
            Ok(resp) if !resp.status().is_success() => {
                log::warn!("deleting package {run_id} returned {}", resp.status());
            }
            Err(e) => log::warn!("unable to delete package {run_id}: {e}"),
            Ok(_) => {}
        }
    }
}

impl ControlPlane for HttpClient {
    fn download(&self, run_id: &str, dest: &mut dyn Write) -> Result<u64, Error> {
        let package = self.create_package(run_id)?;

        let url = format!("{}/{}", package.url.trim_end_matches('/'), package.filename);
        log::debug!("downloading {url}");
        let mut resp = self.http.post(&url).send()?;
        if resp.status() != StatusCode::OK {
            return Err(Error::Download {
                code: resp.status().as_u16(),
                resource: format!("{url}:{}", package.filename),
            });
        }

        let n_bytes = resp.copy_to(dest)?;
        dest.flush()?;
        log::info!("downloaded {n_bytes} bytes for {run_id}");

        self.delete_package(run_id);
        Ok(n_bytes)
    }

    fn upload(&self, archive: &Path) -> Result<UploadReceipt, Error> {
        let url = self.endpoint("run/upload");
        log::debug!("uploading {archive:?} to {url}");

        let part = multipart::Part::file(archive)?.mime_str(ARCHIVE_MIME)?;
        let form = multipart::Form::new().part("file", part);
        let resp = self.http.post(&url).multipart(form).send()?;

        if resp.status() != StatusCode::OK {
            return Err(Error::Upload {
                code: resp.status().as_u16(),
                path: archive.to_path_buf(),
            });
        }
        let body = resp.text()?;
        Ok(UploadReceipt::from_body(&body))
    }

    fn report(&self, run_id: &str, status: Status, message: &str) -> Result<(), Error> {
        let resp = self
            .http
            .post(self.endpoint("run/update"))
            .form(&[
                ("uuid", run_id),
                ("status", status.as_str()),
                ("message", message),
            ])
            .send()?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(Error::Report {
                code: resp.status().as_u16(),
                status: status.to_string(),
            })
        }
    }
}
