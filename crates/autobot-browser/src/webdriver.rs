//! W3C WebDriver wire client.
//!
//! Speaks plain JSON-over-HTTP to a chromedriver endpoint with a blocking
//! reqwest client (workers live on their own OS threads). Only the handful
//! of endpoints the adapters need are implemented.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use serde_json::{json, Value};
use tracing::{debug, warn};

use autobot_core::AutobotError;

use crate::session::{BrowserSession, By, ElementHandle, SessionFactory, SessionInterrupt};

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

// ── Factory ──────────────────────────────────────────────────────────────────

/// Opens Chrome sessions against a chromedriver endpoint, one profile and
/// download directory per alias.
pub struct WebDriverFactory {
    endpoint: String,
    profile_root: PathBuf,
    download_root: PathBuf,
}

impl WebDriverFactory {
    pub fn new(
        endpoint: impl Into<String>,
        profile_root: impl Into<PathBuf>,
        download_root: impl Into<PathBuf>,
    ) -> Self {
        WebDriverFactory {
            endpoint: endpoint.into(),
            profile_root: profile_root.into(),
            download_root: download_root.into(),
        }
    }
}

impl SessionFactory for WebDriverFactory {
    fn open(&self, alias: &str) -> Result<Box<dyn BrowserSession>, AutobotError> {
        let profile_dir = self.profile_root.join(alias);
        let download_dir = self.download_root.join(alias);
        std::fs::create_dir_all(&profile_dir)?;
        std::fs::create_dir_all(&download_dir)?;

        let session = WebDriverSession::create(&self.endpoint, &profile_dir, download_dir)?;
        Ok(Box::new(session))
    }
}

// ── Session ──────────────────────────────────────────────────────────────────

pub struct WebDriverSession {
    http: reqwest::blocking::Client,
    base: String,
    session_id: Arc<str>,
    download_dir: PathBuf,
    endpoint: String,
}

impl WebDriverSession {
    /// POST /session with the Chrome profile and download preferences the
    /// workers rely on.
    pub fn create(
        endpoint: &str,
        profile_dir: &Path,
        download_dir: PathBuf,
    ) -> Result<Self, AutobotError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|e| AutobotError::Driver(e.to_string()))?;

        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": [
                            format!("--user-data-dir={}", profile_dir.display()),
                            "--start-maximized",
                            "--no-sandbox",
                            "--disable-dev-shm-usage",
                            "--ignore-certificate-errors",
                            "--allow-insecure-localhost",
                            "--ignore-ssl-errors",
                        ],
                        "prefs": {
                            "download.default_directory": download_dir.display().to_string(),
                            "download.prompt_for_download": false,
                            "profile.default_content_setting_values.automatic_downloads": 1,
                        }
                    }
                }
            }
        });

        let endpoint = endpoint.trim_end_matches('/').to_string();
        let resp: Value = http
            .post(format!("{endpoint}/session"))
            .json(&capabilities)
            .send()
            .map_err(|e| AutobotError::Driver(e.to_string()))?
            .json()
            .map_err(|e| AutobotError::Driver(e.to_string()))?;

        let session_id = resp["value"]["sessionId"]
            .as_str()
            .ok_or_else(|| AutobotError::Driver(format!("no sessionId in response: {resp}")))?
            .to_string();
        debug!(session = %session_id, "webdriver session created");

        let base = format!("{endpoint}/session/{session_id}");
        Ok(WebDriverSession {
            http,
            base,
            session_id: session_id.into(),
            download_dir,
            endpoint,
        })
    }

    fn cmd(&self, method: reqwest::Method, path: &str, body: Option<Value>) -> Result<Value, AutobotError> {
        let url = format!("{}{}", self.base, path);
        let mut req = self.http.request(method, &url);
        if let Some(body) = body {
            req = req.json(&body);
        } else {
            // chromedriver insists on a JSON body for every POST
            req = req.json(&json!({}));
        }
        let resp = req.send().map_err(|e| AutobotError::Driver(e.to_string()))?;
        let status = resp.status();
        let value: Value = resp
            .json()
            .map_err(|e| AutobotError::Driver(e.to_string()))?;

        if !status.is_success() {
            let error = value["value"]["error"].as_str().unwrap_or("").to_string();
            let message = value["value"]["message"].as_str().unwrap_or("").to_string();
            if error == "no such element" {
                return Err(AutobotError::ElementNotFound(message));
            }
            if error == "timeout" || error == "script timeout" {
                return Err(AutobotError::Timeout(message));
            }
            return Err(AutobotError::Driver(format!("{error}: {message}")));
        }
        Ok(value["value"].clone())
    }

    fn get(&self, path: &str) -> Result<Value, AutobotError> {
        let url = format!("{}{}", self.base, path);
        let resp = self
            .http
            .get(&url)
            .send()
            .map_err(|e| AutobotError::Driver(e.to_string()))?;
        let status = resp.status();
        let value: Value = resp
            .json()
            .map_err(|e| AutobotError::Driver(e.to_string()))?;
        if !status.is_success() {
            let error = value["value"]["error"].as_str().unwrap_or("").to_string();
            let message = value["value"]["message"].as_str().unwrap_or("").to_string();
            return Err(AutobotError::Driver(format!("{error}: {message}")));
        }
        Ok(value["value"].clone())
    }

    fn post(&self, path: &str, body: Value) -> Result<Value, AutobotError> {
        self.cmd(reqwest::Method::POST, path, Some(body))
    }

    fn element_arg(el: &ElementHandle) -> Value {
        json!({ ELEMENT_KEY: el.0 })
    }

    fn run_script(&self, script: &str, args: Vec<Value>) -> Result<Value, AutobotError> {
        self.post("/execute/sync", json!({ "script": script, "args": args }))
    }

    fn decode_png(value: Value) -> Result<Vec<u8>, AutobotError> {
        let b64 = value
            .as_str()
            .ok_or_else(|| AutobotError::Driver("screenshot response not a string".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(b64)
            .map_err(|e| AutobotError::Driver(format!("screenshot decode: {e}")))
    }
}

impl BrowserSession for WebDriverSession {
    fn navigate(&mut self, url: &str) -> Result<(), AutobotError> {
        self.post("/url", json!({ "url": url })).map(|_| ())
    }

    fn current_url(&mut self) -> Result<String, AutobotError> {
        Ok(self.get("/url")?.as_str().unwrap_or_default().to_string())
    }

    fn title(&mut self) -> Result<String, AutobotError> {
        Ok(self.get("/title")?.as_str().unwrap_or_default().to_string())
    }

    fn page_source(&mut self) -> Result<String, AutobotError> {
        Ok(self.get("/source")?.as_str().unwrap_or_default().to_string())
    }

    fn try_find(&mut self, by: &By) -> Result<Option<ElementHandle>, AutobotError> {
        let (using, value) = by.strategy();
        match self.post("/element", json!({ "using": using, "value": value })) {
            Ok(v) => {
                let id = v[ELEMENT_KEY]
                    .as_str()
                    .ok_or_else(|| AutobotError::Driver(format!("bad element response: {v}")))?;
                Ok(Some(ElementHandle(id.to_string())))
            }
            Err(AutobotError::ElementNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn find_all(&mut self, by: &By) -> Result<Vec<ElementHandle>, AutobotError> {
        let (using, value) = by.strategy();
        let v = self.post("/elements", json!({ "using": using, "value": value }))?;
        let list = v
            .as_array()
            .ok_or_else(|| AutobotError::Driver("elements response not a list".into()))?;
        Ok(list
            .iter()
            .filter_map(|e| e[ELEMENT_KEY].as_str())
            .map(|id| ElementHandle(id.to_string()))
            .collect())
    }

    fn click(&mut self, el: &ElementHandle) -> Result<(), AutobotError> {
        self.post(&format!("/element/{}/click", el.0), json!({}))
            .map(|_| ())
    }

    fn js_click(&mut self, el: &ElementHandle) -> Result<(), AutobotError> {
        self.run_script("arguments[0].click();", vec![Self::element_arg(el)])
            .map(|_| ())
    }

    fn type_text(&mut self, el: &ElementHandle, text: &str) -> Result<(), AutobotError> {
        self.post(&format!("/element/{}/value", el.0), json!({ "text": text }))
            .map(|_| ())
    }

    fn clear(&mut self, el: &ElementHandle) -> Result<(), AutobotError> {
        self.post(&format!("/element/{}/clear", el.0), json!({}))
            .map(|_| ())
    }

    fn text_of(&mut self, el: &ElementHandle) -> Result<String, AutobotError> {
        Ok(self
            .get(&format!("/element/{}/text", el.0))?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    fn is_displayed(&mut self, el: &ElementHandle) -> Result<bool, AutobotError> {
        Ok(self
            .get(&format!("/element/{}/displayed", el.0))?
            .as_bool()
            .unwrap_or(false))
    }

    fn set_value(&mut self, el: &ElementHandle, value: &str) -> Result<(), AutobotError> {
        self.run_script(
            "arguments[0].value = arguments[1]; \
             arguments[0].dispatchEvent(new Event('change', {bubbles: true}));",
            vec![Self::element_arg(el), json!(value)],
        )
        .map(|_| ())
    }

    fn remove_readonly(&mut self, el: &ElementHandle) -> Result<(), AutobotError> {
        self.run_script(
            "arguments[0].removeAttribute('readonly');",
            vec![Self::element_arg(el)],
        )
        .map(|_| ())
    }

    fn scroll_into_view(&mut self, el: &ElementHandle) -> Result<(), AutobotError> {
        self.run_script(
            "arguments[0].scrollIntoView({block:'center'});",
            vec![Self::element_arg(el)],
        )
        .map(|_| ())
    }

    fn execute_script(&mut self, script: &str) -> Result<serde_json::Value, AutobotError> {
        self.run_script(script, vec![])
    }

    fn screenshot_element(&mut self, el: &ElementHandle) -> Result<Vec<u8>, AutobotError> {
        let v = self.get(&format!("/element/{}/screenshot", el.0))?;
        Self::decode_png(v)
    }

    fn screenshot(&mut self) -> Result<Vec<u8>, AutobotError> {
        let v = self.get("/screenshot")?;
        Self::decode_png(v)
    }

    fn window_handles(&mut self) -> Result<Vec<String>, AutobotError> {
        let v = self.get("/window/handles")?;
        Ok(v.as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|h| h.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn current_window(&mut self) -> Result<String, AutobotError> {
        Ok(self.get("/window")?.as_str().unwrap_or_default().to_string())
    }

    fn switch_window(&mut self, handle: &str) -> Result<(), AutobotError> {
        self.post("/window", json!({ "handle": handle })).map(|_| ())
    }

    fn open_tab(&mut self) -> Result<String, AutobotError> {
        let v = self.post("/window/new", json!({ "type": "tab" }))?;
        v["handle"]
            .as_str()
            .map(str::to_string)
            .ok_or(AutobotError::TabUnavailable)
    }

    fn close_window(&mut self) -> Result<(), AutobotError> {
        self.cmd(reqwest::Method::DELETE, "/window", None).map(|_| ())
    }

    fn download_dir(&self) -> &Path {
        &self.download_dir
    }

    fn interrupt(&self) -> Box<dyn SessionInterrupt> {
        Box::new(WebDriverInterrupt {
            endpoint: self.endpoint.clone(),
            session_id: Arc::clone(&self.session_id),
        })
    }

    fn quit(&mut self) -> Result<(), AutobotError> {
        self.cmd(reqwest::Method::DELETE, "", None).map(|_| ())
    }
}

/// Tears the session down from another thread via its own HTTP client; the
/// driver aborts whatever command is in flight.
struct WebDriverInterrupt {
    endpoint: String,
    session_id: Arc<str>,
}

impl SessionInterrupt for WebDriverInterrupt {
    fn quit(&self) {
        let url = format!("{}/session/{}", self.endpoint, self.session_id);
        match reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
        {
            Ok(client) => {
                if let Err(e) = client.delete(&url).send() {
                    warn!(error = %e, "session interrupt delete failed");
                }
            }
            Err(e) => warn!(error = %e, "could not build interrupt client"),
        }
    }
}
