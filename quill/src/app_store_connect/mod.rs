// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! App Store Connect API access.

pub mod api_token;
pub mod notary_api;

pub use {
    api_token::{AppStoreConnectToken, ConnectTokenEncoder},
    notary_api::{NotaryApi, NotaryClient},
};

use {crate::error::QuillError, reqwest::Client, std::time::Duration};

/// Build the HTTP client used for Apple services.
pub fn default_client() -> Result<Client, QuillError> {
    Ok(Client::builder()
        .user_agent(concat!("quill/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(30))
        .build()?)
}
