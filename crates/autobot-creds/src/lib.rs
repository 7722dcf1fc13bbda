//! autobot-creds — the CSV-backed credential store.
//!
//! Schema: `alias,login_id,user_id,username,password,account_number`.
//! The store keeps an in-memory map that is rebuilt after every successful
//! write; the supervisor is the single writer, readers clone snapshots.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::{info, warn};

use autobot_core::{AutobotError, Credential, CredentialField};

const COLUMNS: [&str; 6] = [
    "alias",
    "login_id",
    "user_id",
    "username",
    "password",
    "account_number",
];

/// Credential store: CSV file + in-memory copy.
pub struct CredStore {
    path: PathBuf,
    by_alias: Mutex<BTreeMap<String, Credential>>,
}

impl CredStore {
    /// Open the store and load the current file. A missing file yields an
    /// empty store (rows can be appended later via `/add`).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, AutobotError> {
        let path = path.into();
        let store = CredStore {
            path,
            by_alias: Mutex::new(BTreeMap::new()),
        };
        if store.path.exists() {
            store.reload()?;
        } else {
            warn!(path = %store.path.display(), "credentials CSV not found; starting empty");
        }
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the CSV into the in-memory map.
    ///
    /// Incomplete rows are skipped with a logged reason (first five reasons
    /// in full, the rest as a count); a duplicate alias keeps the later row.
    pub fn reload(&self) -> Result<(), AutobotError> {
        let mut rdr = csv::Reader::from_path(&self.path)
            .map_err(|e| AutobotError::CredStoreCorrupt(e.to_string()))?;

        let headers = rdr
            .headers()
            .map_err(|e| AutobotError::CredStoreCorrupt(e.to_string()))?
            .clone();
        for required in COLUMNS {
            if !headers.iter().any(|h| h.eq_ignore_ascii_case(required)) {
                return Err(AutobotError::CredStoreCorrupt(format!(
                    "missing column '{required}' in {}",
                    self.path.display()
                )));
            }
        }

        let mut out = BTreeMap::new();
        let mut skipped: Vec<String> = Vec::new();
        let mut line = 1usize; // header is line 1

        for record in rdr.records() {
            line += 1;
            let record = record.map_err(|e| AutobotError::CredStoreCorrupt(e.to_string()))?;
            let field = |name: &str| -> String {
                headers
                    .iter()
                    .position(|h| h.eq_ignore_ascii_case(name))
                    .and_then(|i| record.get(i))
                    .unwrap_or("")
                    .trim()
                    .to_string()
            };

            let alias = field("alias");
            if alias.is_empty() {
                skipped.push(format!("line {line}: empty alias"));
                continue;
            }

            let cred = Credential::from_fields(
                &alias,
                &field("login_id"),
                &field("user_id"),
                &field("username"),
                &field("password"),
                &field("account_number"),
            );
            if let Err(e) = cred.validate() {
                skipped.push(format!("line {line} (alias: {alias}): {e}"));
                continue;
            }

            if out.contains_key(&alias) {
                warn!(alias = %alias, line, "duplicate alias; overwriting previous row");
            }
            out.insert(alias, cred);
        }

        info!(
            count = out.len(),
            path = %self.path.display(),
            "loaded credentials"
        );
        if !skipped.is_empty() {
            warn!(skipped = skipped.len(), "skipped incomplete credential rows");
            for reason in skipped.iter().take(5) {
                warn!("  - {reason}");
            }
            if skipped.len() > 5 {
                warn!("  ... and {} more skipped rows", skipped.len() - 5);
            }
        }

        // A file that parses but yields zero usable rows is an error, not an
        // empty store.
        if out.is_empty() {
            return Err(AutobotError::CredStoreCorrupt(format!(
                "no valid credentials found in {}",
                self.path.display()
            )));
        }

        *self.by_alias.lock().unwrap_or_else(|p| p.into_inner()) = out;
        Ok(())
    }

    /// Clone of the in-memory map.
    pub fn snapshot(&self) -> BTreeMap<String, Credential> {
        self.by_alias
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn get(&self, alias: &str) -> Option<Credential> {
        self.by_alias
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(alias)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.by_alias.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Change one field of one row: read-all → modify → write-all, enforcing
    /// account-number uniqueness, then rebuild the in-memory map.
    pub fn update_field(
        &self,
        alias: &str,
        field: CredentialField,
        value: &str,
    ) -> Result<(), AutobotError> {
        let value = value.trim();
        let (headers, mut rows) = self.read_all_rows()?;

        let mut found = false;
        let mut used_by: Option<String> = None;
        let alias_idx = column_index(&headers, "alias")?;
        let acct_idx = column_index(&headers, "account_number")?;
        let field_idx = column_index(&headers, field.column())?;

        for row in rows.iter_mut() {
            let row_alias = row.get(alias_idx).cloned().unwrap_or_default();
            let row_acct = row.get(acct_idx).cloned().unwrap_or_default();

            if field == CredentialField::AccountNumber
                && row_acct.trim() == value
                && row_alias.trim() != alias
            {
                used_by = Some(row_alias.trim().to_string());
            }
            if row_alias.trim() == alias {
                row[field_idx] = value.to_string();
                found = true;
            }
        }

        if !found {
            return Err(AutobotError::UnknownAlias(alias.to_string()));
        }
        if let Some(existing_alias) = used_by {
            return Err(AutobotError::DuplicateAccountNumber {
                account: value.to_string(),
                existing_alias,
            });
        }

        self.write_all_rows(&headers, &rows)?;
        self.reload()
    }

    /// Append a new row, refusing duplicate aliases and account numbers.
    /// Creates the file (with header) when absent.
    pub fn append(&self, cred: &Credential) -> Result<(), AutobotError> {
        cred.validate()?;
        {
            let map = self.by_alias.lock().unwrap_or_else(|p| p.into_inner());
            if map.contains_key(&cred.alias) {
                return Err(AutobotError::DuplicateAlias(cred.alias.clone()));
            }
            for (alias, existing) in map.iter() {
                if existing.account_number == cred.account_number {
                    return Err(AutobotError::DuplicateAccountNumber {
                        account: cred.account_number.clone(),
                        existing_alias: alias.clone(),
                    });
                }
            }
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let is_new = !self.path.exists()
            || fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0) == 0;

        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if is_new {
            wtr.write_record(COLUMNS)
                .map_err(|e| AutobotError::CredStoreCorrupt(e.to_string()))?;
        }
        wtr.write_record([
            cred.alias.as_str(),
            cred.login_id.as_str(),
            cred.user_id.as_str(),
            cred.username.as_str(),
            cred.password.as_str(),
            cred.account_number.as_str(),
        ])
        .map_err(|e| AutobotError::CredStoreCorrupt(e.to_string()))?;
        wtr.flush()?;

        self.reload()
    }

    // ── file IO ──────────────────────────────────────────────────────────────

    fn read_all_rows(&self) -> Result<(Vec<String>, Vec<Vec<String>>), AutobotError> {
        let mut rdr = csv::Reader::from_path(&self.path)
            .map_err(|e| AutobotError::CredStoreCorrupt(e.to_string()))?;
        let headers: Vec<String> = rdr
            .headers()
            .map_err(|e| AutobotError::CredStoreCorrupt(e.to_string()))?
            .iter()
            .map(|h| h.to_string())
            .collect();
        let mut rows = Vec::new();
        for record in rdr.records() {
            let record = record.map_err(|e| AutobotError::CredStoreCorrupt(e.to_string()))?;
            rows.push(record.iter().map(|f| f.to_string()).collect());
        }
        Ok((headers, rows))
    }

    fn write_all_rows(
        &self,
        headers: &[String],
        rows: &[Vec<String>],
    ) -> Result<(), AutobotError> {
        let mut wtr = csv::Writer::from_path(&self.path)
            .map_err(|e| AutobotError::CredStoreCorrupt(e.to_string()))?;
        wtr.write_record(headers)
            .map_err(|e| AutobotError::CredStoreCorrupt(e.to_string()))?;
        for row in rows {
            wtr.write_record(row)
                .map_err(|e| AutobotError::CredStoreCorrupt(e.to_string()))?;
        }
        wtr.flush()?;
        Ok(())
    }
}

fn column_index(headers: &[String], name: &str) -> Result<usize, AutobotError> {
    headers
        .iter()
        .position(|h| h.eq_ignore_ascii_case(name))
        .ok_or_else(|| AutobotError::CredStoreCorrupt(format!("missing column '{name}'")))
}
