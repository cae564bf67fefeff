//! Record-keeping collaborators: filed tax returns, exported facts and the authorization code
//! registry. Directory-backed implementations serve a deployment; memory-backed ones serve tests.

use std::collections::HashMap;
use std::fmt::{Display, Formatter, Result as FormatResult};
use std::io::ErrorKind as IoErrorKind;
use std::path::PathBuf;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use futures::future::{self, Future};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::claims::is_state_code;
use crate::token::OpaqueCode;

lazy_static! {
    static ref RE_SUBMISSION_ID: Regex = Regex::new(r"^[A-Za-z0-9]{1,64}$").expect("cannot compile regex");
}

define_error!(RecordError; NotFound="record not found", Unavailable="record store unavailable");

pub type RecordFuture<T> = Box<dyn Future<Item=T, Error=RecordError> + Send>;
pub type ExportedFacts = Map<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Accepted,
    Pending,
    Rejected,
    Error,
}

impl Display for SubmissionStatus {
    fn fmt(&self, f: &mut Formatter) -> FormatResult {
        f.write_str(match self {
            SubmissionStatus::Accepted => "accepted",
            SubmissionStatus::Pending => "pending",
            SubmissionStatus::Rejected => "rejected",
            SubmissionStatus::Error => "error",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxReturnRecord {
    pub tax_return_id: Uuid,
    pub tax_year: u16,
    pub submission_id: String,
    pub status: SubmissionStatus,
    pub xml: String,
}

pub trait TaxReturnSource: Send + Sync {
    fn tax_return(&self, tax_year: u16, tax_return_id: &Uuid, submission_id: &str) -> RecordFuture<TaxReturnRecord>;

    fn status(&self, tax_year: u16, tax_return_id: &Uuid, submission_id: &str) -> RecordFuture<SubmissionStatus> {
        Box::new(self.tax_return(tax_year, tax_return_id, submission_id).map(|record| record.status))
    }
}

pub trait ExportedFactsSource: Send + Sync {
    fn exported_facts(&self, submission_id: &str, state_code: &str, account_id: &str) -> RecordFuture<ExportedFacts>;
}

/// Submissions live at `<root>/<year>/taxreturns/<tax return id>/submissions/<submission id>.xml`
/// with a `<submission id>.json` status document alongside.
pub struct DirectoryTaxReturns {
    root: PathBuf,
}

#[derive(Deserialize, Debug)]
struct StatusDocument {
    status: SubmissionStatus,
}

impl DirectoryTaxReturns {
    pub fn new<P>(root: P) -> DirectoryTaxReturns where P: Into<PathBuf> {
        DirectoryTaxReturns { root: root.into() }
    }

    fn submission_path(&self, tax_year: u16, tax_return_id: &Uuid, submission_id: &str) -> PathBuf {
        self.root
            .join(tax_year.to_string())
            .join("taxreturns")
            .join(tax_return_id.to_hyphenated().to_string())
            .join("submissions")
            .join(submission_id)
    }
}

fn read_file(path: PathBuf) -> impl Future<Item=Vec<u8>, Error=RecordError> {
    tokio::fs::read(path.clone())
        .map_err(move |e| {
            if e.kind() == IoErrorKind::NotFound {
                RecordError::NotFound
            } else {
                error!("Cannot read {}: {}", path.display(), e);
                RecordError::Unavailable
            }
        })
}

impl TaxReturnSource for DirectoryTaxReturns {
    fn tax_return(&self, tax_year: u16, tax_return_id: &Uuid, submission_id: &str) -> RecordFuture<TaxReturnRecord> {
        if !RE_SUBMISSION_ID.is_match(submission_id) {
            return Box::new(future::err(RecordError::NotFound));
        }
        let base = self.submission_path(tax_year, tax_return_id, submission_id);
        let tax_return_id = *tax_return_id;
        let submission_id = submission_id.to_owned();
        let status = read_file(base.with_extension("json"))
            .and_then(|status| {
                serde_json::from_slice::<StatusDocument>(&status)
                    .map(|document| document.status)
                    .map_err(|e| {
                        error!("Invalid submission status document: {}", e);
                        RecordError::Unavailable
                    })
            });
        let xml = read_file(base.with_extension("xml"))
            .and_then(|xml| {
                String::from_utf8(xml).map_err(|e| {
                    error!("Submission XML is not UTF-8: {}", e);
                    RecordError::Unavailable
                })
            });
        Box::new(
            status.join(xml)
                .map(move |(status, xml)| TaxReturnRecord { tax_return_id, tax_year, submission_id, status, xml })
        )
    }

    fn status(&self, tax_year: u16, tax_return_id: &Uuid, submission_id: &str) -> RecordFuture<SubmissionStatus> {
        if !RE_SUBMISSION_ID.is_match(submission_id) {
            return Box::new(future::err(RecordError::NotFound));
        }
        let path = self.submission_path(tax_year, tax_return_id, submission_id).with_extension("json");
        Box::new(
            read_file(path)
                .and_then(|status| {
                    serde_json::from_slice::<StatusDocument>(&status)
                        .map(|document| document.status)
                        .map_err(|e| {
                            error!("Invalid submission status document: {}", e);
                            RecordError::Unavailable
                        })
                })
        )
    }
}

/// Facts live at `<root>/<state code>/<submission id>.json`; a missing file means no facts.
pub struct DirectoryExportedFacts {
    root: PathBuf,
}

impl DirectoryExportedFacts {
    pub fn new<P>(root: P) -> DirectoryExportedFacts where P: Into<PathBuf> {
        DirectoryExportedFacts { root: root.into() }
    }
}

impl ExportedFactsSource for DirectoryExportedFacts {
    fn exported_facts(&self, submission_id: &str, state_code: &str, account_id: &str) -> RecordFuture<ExportedFacts> {
        if !RE_SUBMISSION_ID.is_match(submission_id) || !is_state_code(state_code) {
            return Box::new(future::err(RecordError::NotFound));
        }
        debug!("Reading exported facts for {} on behalf of {}", submission_id, account_id);
        let path = self.root.join(state_code).join(format!("{}.json", submission_id));
        Box::new(
            read_file(path)
                .then(|read| match read {
                    Ok(facts) => serde_json::from_slice::<ExportedFacts>(&facts)
                        .map_err(|e| {
                            error!("Invalid exported facts document: {}", e);
                            RecordError::Unavailable
                        }),
                    Err(RecordError::NotFound) => Ok(ExportedFacts::new()),
                    Err(e) => Err(e),
                })
        )
    }
}

type RecordKey = (u16, Uuid, String);

#[derive(Default)]
pub struct MemoryTaxReturns {
    records: RwLock<HashMap<RecordKey, TaxReturnRecord>>,
}

impl MemoryTaxReturns {
    pub fn new() -> MemoryTaxReturns {
        Default::default()
    }

    pub fn insert(&self, record: TaxReturnRecord) {
        if let Ok(mut records) = self.records.write() {
            records.insert((record.tax_year, record.tax_return_id, record.submission_id.clone()), record);
        }
    }
}

impl TaxReturnSource for MemoryTaxReturns {
    fn tax_return(&self, tax_year: u16, tax_return_id: &Uuid, submission_id: &str) -> RecordFuture<TaxReturnRecord> {
        let record = self.records.read()
            .or(Err(RecordError::Unavailable))
            .and_then(|records| {
                records.get(&(tax_year, *tax_return_id, submission_id.to_owned()))
                    .cloned()
                    .ok_or(RecordError::NotFound)
            });
        Box::new(future::result(record))
    }
}

#[derive(Default)]
pub struct MemoryExportedFacts {
    facts: RwLock<HashMap<(String, String), ExportedFacts>>,
}

impl MemoryExportedFacts {
    pub fn new() -> MemoryExportedFacts {
        Default::default()
    }

    pub fn insert(&self, submission_id: &str, state_code: &str, facts: ExportedFacts) {
        if let Ok(mut all_facts) = self.facts.write() {
            all_facts.insert((submission_id.to_owned(), state_code.to_owned()), facts);
        }
    }
}

impl ExportedFactsSource for MemoryExportedFacts {
    fn exported_facts(&self, submission_id: &str, state_code: &str, _account_id: &str) -> RecordFuture<ExportedFacts> {
        let facts = self.facts.read()
            .or(Err(RecordError::Unavailable))
            .map(|facts| {
                facts.get(&(submission_id.to_owned(), state_code.to_owned()))
                    .cloned()
                    .unwrap_or_default()
            });
        Box::new(future::result(facts))
    }
}

/// Maps the identifier handed to callers onto the opaque code it stands for.
pub trait AuthorizationCodeStore: Send + Sync {
    fn register(&self, code: OpaqueCode) -> Result<Uuid, RecordError>;

    fn lookup(&self, id: &Uuid) -> Result<String, RecordError>;

    fn purge_expired(&self, now: DateTime<Utc>) -> usize;
}

#[derive(Default)]
pub struct MemoryAuthorizationCodeStore {
    codes: RwLock<HashMap<Uuid, OpaqueCode>>,
}

impl MemoryAuthorizationCodeStore {
    pub fn new() -> MemoryAuthorizationCodeStore {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.codes.read().map(|codes| codes.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AuthorizationCodeStore for MemoryAuthorizationCodeStore {
    fn register(&self, code: OpaqueCode) -> Result<Uuid, RecordError> {
        let mut codes = self.codes.write()
            .or(Err(RecordError::Unavailable))?;
        let id = Uuid::new_v4();
        codes.insert(id, code);
        Ok(id)
    }

    // expired entries stay visible until purged so that verification reports them as expired
    fn lookup(&self, id: &Uuid) -> Result<String, RecordError> {
        let codes = self.codes.read()
            .or(Err(RecordError::Unavailable))?;
        codes.get(id)
            .map(|code| code.value.clone())
            .ok_or(RecordError::NotFound)
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        match self.codes.write() {
            Ok(mut codes) => {
                let before = codes.len();
                codes.retain(|_, code| code.expires_at > now);
                before - codes.len()
            },
            Err(_) => 0,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use chrono::Duration;
    use serde_json::json;
    use tempdir::TempDir;
    use tokio::runtime::Runtime;

    fn tax_return_id() -> Uuid {
        "11111111-1111-1111-1111-111111111111".parse().unwrap()
    }

    #[test]
    fn status_wire_form() {
        assert_eq!(serde_json::to_value(SubmissionStatus::Accepted).unwrap(), json!("accepted"));
        assert_eq!(serde_json::from_value::<SubmissionStatus>(json!("rejected")).unwrap(), SubmissionStatus::Rejected);
        assert_eq!(SubmissionStatus::Pending.to_string(), "pending");
    }

    #[test]
    fn directory_tax_returns() {
        let dir = TempDir::new("state-export").unwrap();
        let submissions = dir.path().join("2023/taxreturns/11111111-1111-1111-1111-111111111111/submissions");
        fs::create_dir_all(&submissions).unwrap();
        fs::write(submissions.join("123456789AB.xml"), "<Return/>").unwrap();
        fs::write(submissions.join("123456789AB.json"), r#"{"status": "accepted"}"#).unwrap();
        fs::write(submissions.join("BROKEN.json"), r#"{"status": "lost"}"#).unwrap();

        let source = DirectoryTaxReturns::new(dir.path());
        let mut runtime = Runtime::new().unwrap();
        let record = runtime.block_on(source.tax_return(2023, &tax_return_id(), "123456789AB")).unwrap();
        assert_eq!(record.status, SubmissionStatus::Accepted);
        assert_eq!(record.xml, "<Return/>");
        assert_eq!(record.submission_id, "123456789AB");
        assert_eq!(runtime.block_on(source.status(2023, &tax_return_id(), "123456789AB")), Ok(SubmissionStatus::Accepted));

        assert_eq!(runtime.block_on(source.tax_return(2022, &tax_return_id(), "123456789AB")), Err(RecordError::NotFound));
        assert_eq!(runtime.block_on(source.status(2023, &tax_return_id(), "../../x")), Err(RecordError::NotFound));
        assert_eq!(runtime.block_on(source.status(2023, &tax_return_id(), "BROKEN")), Err(RecordError::Unavailable));
    }

    #[test]
    fn directory_exported_facts() {
        let dir = TempDir::new("state-export").unwrap();
        fs::create_dir_all(dir.path().join("MA")).unwrap();
        fs::write(dir.path().join("MA/123456789AB.json"), r#"{"/filingStatus": "single"}"#).unwrap();

        let source = DirectoryExportedFacts::new(dir.path());
        let mut runtime = Runtime::new().unwrap();
        let facts = runtime.block_on(source.exported_facts("123456789AB", "MA", "ma-account")).unwrap();
        assert_eq!(facts.get("/filingStatus"), Some(&json!("single")));
        let facts = runtime.block_on(source.exported_facts("OTHER", "MA", "ma-account")).unwrap();
        assert!(facts.is_empty());
        assert_eq!(runtime.block_on(source.exported_facts("123456789AB", "../MA", "ma-account")), Err(RecordError::NotFound));
    }

    #[test]
    fn memory_sources() {
        let tax_returns = MemoryTaxReturns::new();
        tax_returns.insert(TaxReturnRecord {
            tax_return_id: tax_return_id(),
            tax_year: 2023,
            submission_id: "123456789AB".to_owned(),
            status: SubmissionStatus::Pending,
            xml: "<Return/>".to_owned(),
        });
        assert_eq!(tax_returns.status(2023, &tax_return_id(), "123456789AB").wait(), Ok(SubmissionStatus::Pending));
        assert_eq!(tax_returns.status(2023, &tax_return_id(), "OTHER").wait(), Err(RecordError::NotFound));

        let facts = MemoryExportedFacts::new();
        let mut map = ExportedFacts::new();
        map.insert("/filingStatus".to_owned(), json!("single"));
        facts.insert("123456789AB", "MA", map.clone());
        assert_eq!(facts.exported_facts("123456789AB", "MA", "ma-account").wait(), Ok(map));
        assert_eq!(facts.exported_facts("123456789AB", "NY", "ny-account").wait(), Ok(ExportedFacts::new()));
    }

    #[test]
    fn code_registry() {
        let store = MemoryAuthorizationCodeStore::new();
        let now = Utc::now();
        let live = store.register(OpaqueCode { value: "live".to_owned(), expires_at: now + Duration::seconds(60) }).unwrap();
        let stale = store.register(OpaqueCode { value: "stale".to_owned(), expires_at: now - Duration::seconds(1) }).unwrap();
        assert_ne!(live, stale);
        assert_eq!(store.lookup(&live), Ok("live".to_owned()));
        assert_eq!(store.lookup(&stale), Ok("stale".to_owned()));
        assert_eq!(store.purge_expired(now), 1);
        assert_eq!(store.lookup(&stale), Err(RecordError::NotFound));
        assert_eq!(store.len(), 1);
        assert_eq!(store.lookup(&Uuid::new_v4()), Err(RecordError::NotFound));
    }
}
