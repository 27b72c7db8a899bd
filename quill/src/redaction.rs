// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scrubbing of secrets from log output.

use {
    log::{Log, Metadata, Record},
    once_cell::sync::Lazy,
    std::sync::RwLock,
};

/// Replacement text for any redacted secret.
pub const REDACTED: &str = "*******";

static SECRETS: Lazy<Redactor> = Lazy::new(Redactor::default);

/// A set of strings that must never appear in output.
#[derive(Debug, Default)]
pub struct Redactor {
    secrets: RwLock<Vec<String>>,
}

impl Redactor {
    /// The process-wide redactor consulted by [RedactingLogger].
    pub fn global() -> &'static Redactor {
        &SECRETS
    }

    /// Register a secret. Values of one character or less are ignored.
    pub fn add(&self, secret: impl Into<String>) {
        let secret = secret.into();

        if secret.chars().count() <= 1 {
            return;
        }

        let mut secrets = match self.secrets.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if !secrets.contains(&secret) {
            secrets.push(secret);
            // Longest first so a secret containing another is replaced whole.
            secrets.sort_by_key(|s| std::cmp::Reverse(s.len()));
        }
    }

    /// Replace every registered secret in `s`.
    pub fn apply(&self, s: &str) -> String {
        let secrets = match self.secrets.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        secrets
            .iter()
            .fold(s.to_string(), |acc, secret| acc.replace(secret, REDACTED))
    }
}

/// Register a secret with the global redactor.
pub fn add(secret: impl Into<String>) {
    Redactor::global().add(secret)
}

/// Apply the global redactor.
pub fn apply(s: &str) -> String {
    Redactor::global().apply(s)
}

/// A [Log] implementation that scrubs secrets before delegating.
pub struct RedactingLogger<L: Log> {
    inner: L,
}

impl<L: Log> RedactingLogger<L> {
    pub fn new(inner: L) -> Self {
        Self { inner }
    }
}

impl<L: Log> Log for RedactingLogger<L> {
    fn enabled(&self, metadata: &Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &Record) {
        if !self.inner.enabled(record.metadata()) {
            return;
        }

        let message = apply(&record.args().to_string());

        self.inner.log(
            &Record::builder()
                .metadata(record.metadata().clone())
                .args(format_args!("{}", message))
                .module_path(record.module_path())
                .file(record.file())
                .line(record.line())
                .build(),
        );
    }

    fn flush(&self) {
        self.inner.flush()
    }
}
