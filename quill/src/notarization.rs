// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Apple notarization functionality.

Notarization works by uploading a payload to Apple servers and waiting for
Apple to scan the submitted content. Apple records a verdict for the digest
of what was uploaded.

A submission is registered with the notary API, which hands back temporary
S3 credentials. The payload is uploaded to S3 and the submission status is
polled until Apple reaches a verdict or we give up waiting.
*/

use {
    crate::{
        app_store_connect::{
            notary_api::{NewSubmissionResponseDataAttributes, SubmissionResponseStatus},
            ConnectTokenEncoder, NotaryApi, NotaryClient,
        },
        code_directory::CodeSignatureFlags,
        error::QuillError,
        event_bus::EventBus,
        payload::{Payload, ZIP_CONTENT_TYPE},
        reader::read_images,
        redaction,
        signing_material::InputSource,
    },
    async_trait::async_trait,
    aws_sdk_s3::{
        config::{Credentials, Region},
        error::DisplayErrorContext,
        primitives::ByteStream,
        types::{CompletedMultipartUpload, CompletedPart},
    },
    log::{info, warn},
    std::{sync::Arc, time::Duration},
    tokio::{sync::watch, time::Instant},
};

/// Region hosting the notary service's upload bucket.
pub const NOTARY_S3_REGION: &str = "us-west-2";

/// Size of each part in multipart uploads.
pub const UPLOAD_PART_SIZE: usize = 16 * 1024 * 1024;

/// Where a submission stands.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SubmissionStatus {
    Pending,
    Accepted,
    Invalid,
    Rejected,
    Timeout,
}

impl SubmissionStatus {
    /// Whether no further status changes are expected.
    pub fn is_completed(&self) -> bool {
        !matches!(self, Self::Pending)
    }

    pub fn is_successful(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

impl From<SubmissionResponseStatus> for SubmissionStatus {
    fn from(status: SubmissionResponseStatus) -> Self {
        match status {
            SubmissionResponseStatus::Accepted => Self::Accepted,
            SubmissionResponseStatus::Invalid => Self::Invalid,
            SubmissionResponseStatus::Rejected => Self::Rejected,
            SubmissionResponseStatus::InProgress | SubmissionResponseStatus::Unknown => {
                Self::Pending
            }
        }
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Invalid => "invalid",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
        })
    }
}

/// Controls how submissions are waited on.
#[derive(Clone, Copy, Debug)]
pub struct StatusConfig {
    /// Delay between status requests.
    pub poll_interval: Duration,
    /// Give up waiting after this long.
    pub timeout: Duration,
    /// Wait for a verdict after uploading.
    pub wait: bool,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            timeout: Duration::from_secs(15 * 60),
            wait: true,
        }
    }
}

/// Credentials and wait behavior for the notary service.
#[derive(Clone, Debug, Default)]
pub struct NotaryConfig {
    /// App Store Connect issuer ID.
    pub issuer: String,
    /// App Store Connect API key ID.
    pub key_id: String,
    /// The private key. When absent, `AuthKey_<key_id>.p8` is searched for.
    pub key: Option<InputSource>,
    pub status: StatusConfig,
}

impl NotaryConfig {
    /// Tokens outlive the longest wait so polling never needs a fresh one.
    pub fn token_lifetime(&self) -> Duration {
        self.status.timeout + Duration::from_secs(120)
    }

    pub fn token_encoder(&self) -> Result<ConnectTokenEncoder, QuillError> {
        match &self.key {
            Some(source) => ConnectTokenEncoder::from_input_source(
                self.key_id.clone(),
                self.issuer.clone(),
                source,
            ),
            None => ConnectTokenEncoder::from_api_key_id(self.key_id.clone(), self.issuer.clone()),
        }
    }

    pub fn client(&self) -> Result<NotaryClient, QuillError> {
        NotaryClient::new(self.token_encoder()?, self.token_lifetime())
    }
}

/// A clonable flag that async operations watch to stop early.
#[derive(Clone, Debug)]
pub struct CancellationToken {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for CancellationToken {
    fn default() -> Self {
        let (sender, receiver) = watch::channel(false);

        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once [Self::cancel] is called on any clone.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();

        loop {
            if *receiver.borrow_and_update() {
                return;
            }

            if receiver.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Moves a payload to where the notary service expects it.
#[async_trait]
pub trait PayloadUploader: Send + Sync {
    async fn upload(
        &self,
        target: &NewSubmissionResponseDataAttributes,
        payload: &Payload,
    ) -> Result<(), QuillError>;
}

/// Uploads payloads to S3 using the temporary credentials of a submission.
#[derive(Clone, Debug)]
pub struct S3Uploader {
    region: String,
    part_size: usize,
}

impl Default for S3Uploader {
    fn default() -> Self {
        Self {
            region: NOTARY_S3_REGION.to_string(),
            part_size: UPLOAD_PART_SIZE,
        }
    }
}

fn s3_error(e: impl std::error::Error) -> QuillError {
    QuillError::S3Upload(format!("{}", DisplayErrorContext(e)))
}

impl S3Uploader {
    async fn client(&self, target: &NewSubmissionResponseDataAttributes) -> aws_sdk_s3::Client {
        redaction::add(target.aws_secret_access_key.as_str());
        redaction::add(target.aws_session_token.as_str());

        let credentials = Credentials::new(
            &target.aws_access_key_id,
            &target.aws_secret_access_key,
            Some(target.aws_session_token.clone()),
            None,
            "quill",
        );

        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(Region::new(self.region.clone()))
            .credentials_provider(credentials)
            .load()
            .await;

        aws_sdk_s3::Client::new(&config)
    }

    async fn upload_parts(
        &self,
        client: &aws_sdk_s3::Client,
        target: &NewSubmissionResponseDataAttributes,
        upload_id: &str,
        payload: &Payload,
    ) -> Result<Vec<CompletedPart>, QuillError> {
        let mut parts = vec![];

        for (i, chunk) in payload.data().chunks(self.part_size.max(1)).enumerate() {
            let part_number = i as i32 + 1;

            let output = client
                .upload_part()
                .bucket(&target.bucket)
                .key(&target.object)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk.to_vec()))
                .send()
                .await
                .map_err(s3_error)?;

            parts.push(
                CompletedPart::builder()
                    .set_e_tag(output.e_tag().map(|x| x.to_string()))
                    .part_number(part_number)
                    .build(),
            );
        }

        Ok(parts)
    }
}

#[async_trait]
impl PayloadUploader for S3Uploader {
    async fn upload(
        &self,
        target: &NewSubmissionResponseDataAttributes,
        payload: &Payload,
    ) -> Result<(), QuillError> {
        let client = self.client(target).await;

        info!(
            "uploading {} bytes to s3://{}/{}",
            payload.len(),
            target.bucket,
            target.object
        );

        let multipart = client
            .create_multipart_upload()
            .bucket(&target.bucket)
            .key(&target.object)
            .content_type(ZIP_CONTENT_TYPE)
            .send()
            .await
            .map_err(s3_error)?;

        let upload_id = multipart
            .upload_id()
            .ok_or_else(|| QuillError::S3Upload("no upload id returned".to_string()))?;

        match self.upload_parts(&client, target, upload_id, payload).await {
            Ok(parts) => {
                client
                    .complete_multipart_upload()
                    .bucket(&target.bucket)
                    .key(&target.object)
                    .upload_id(upload_id)
                    .multipart_upload(
                        CompletedMultipartUpload::builder()
                            .set_parts(Some(parts))
                            .build(),
                    )
                    .send()
                    .await
                    .map_err(s3_error)?;

                Ok(())
            }
            Err(e) => {
                if let Err(abort) = client
                    .abort_multipart_upload()
                    .bucket(&target.bucket)
                    .key(&target.object)
                    .upload_id(upload_id)
                    .send()
                    .await
                {
                    warn!("failed to abort upload: {}", DisplayErrorContext(abort));
                }

                Err(e)
            }
        }
    }
}

/// Outcome of a notarization attempt.
#[derive(Clone, Debug)]
pub struct NotarizationResult {
    pub submission_id: String,
    pub status: SubmissionStatus,
    /// Developer log, fetched when the verdict isn't `Accepted`.
    pub log: Option<String>,
}

impl NotarizationResult {
    /// Turn a failed verdict into an error.
    pub fn into_result(self) -> Result<Self, QuillError> {
        match self.status {
            SubmissionStatus::Pending | SubmissionStatus::Accepted => Ok(self),
            status => Err(QuillError::NotarizationFailed {
                status: status.to_string(),
                log: self.log,
            }),
        }
    }
}

/// Errors where the next poll may well succeed.
fn is_transient(e: &QuillError) -> bool {
    match e {
        QuillError::Reqwest(e) => e.is_timeout() || e.is_connect() || e.is_request(),
        QuillError::NotaryServer { status, .. } => status.starts_with('5'),
        _ => false,
    }
}

/// Drives one submission from upload to verdict.
pub struct Submission<'a> {
    api: &'a dyn NotaryApi,
    config: StatusConfig,
    events: Option<EventBus>,
    id: Option<String>,
}

impl<'a> Submission<'a> {
    pub fn new(api: &'a dyn NotaryApi, config: StatusConfig) -> Self {
        Self {
            api,
            config,
            events: None,
            id: None,
        }
    }

    /// Track a submission started earlier.
    pub fn existing(api: &'a dyn NotaryApi, config: StatusConfig, id: impl ToString) -> Self {
        Self {
            id: Some(id.to_string()),
            ..Self::new(api, config)
        }
    }

    /// Publish progress of long operations.
    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    fn require_id(&self) -> Result<&str, QuillError> {
        self.id.as_deref().ok_or(QuillError::SubmissionNotStarted)
    }

    /// Register the payload with the notary service and upload it.
    pub async fn start(
        &mut self,
        payload: &Payload,
        uploader: &dyn PayloadUploader,
        cancel: &CancellationToken,
    ) -> Result<&str, QuillError> {
        let submission_name = payload.submission_name();
        info!("creating notary submission {}", submission_name);

        let response = tokio::select! {
            res = self.api.submit(payload.sha256(), &submission_name) => res?,
            _ = cancel.cancelled() => return Err(QuillError::Cancelled),
        };

        let id = response.data.id;
        info!("created submission ID: {}", id);

        let progress = self
            .events
            .as_ref()
            .map(|bus| bus.task(format!("uploading {}", payload.name()), 1));

        tokio::select! {
            res = uploader.upload(&response.data.attributes, payload) => res?,
            _ = cancel.cancelled() => return Err(QuillError::Cancelled),
        };

        if let Some(progress) = progress {
            progress.finish();
        }

        Ok(self.id.insert(id).as_str())
    }

    /// Fetch the current status once.
    pub async fn status(&self) -> Result<SubmissionStatus, QuillError> {
        let response = self.api.status(self.require_id()?).await?;

        Ok(response.data.attributes.status.into())
    }

    /// Fetch the developer log.
    pub async fn logs(&self) -> Result<String, QuillError> {
        self.api.logs(self.require_id()?).await
    }

    /// Poll until a verdict is reached, the timeout passes or the token is cancelled.
    ///
    /// Timeout and cancellation yield [SubmissionStatus::Timeout].
    pub async fn wait(&self, cancel: &CancellationToken) -> Result<SubmissionStatus, QuillError> {
        let id = self.require_id()?;
        let deadline = Instant::now() + self.config.timeout;

        let progress = self
            .events
            .as_ref()
            .map(|bus| bus.task(format!("waiting for submission {}", id), 1));

        let status = loop {
            if cancel.is_cancelled() {
                break SubmissionStatus::Timeout;
            }

            let res = tokio::select! {
                res = self.api.status(id) => res,
                _ = cancel.cancelled() => break SubmissionStatus::Timeout,
            };

            match res {
                Ok(response) => {
                    let status = SubmissionStatus::from(response.data.attributes.status);
                    info!("submission {} status: {}", id, response.data.attributes.status);

                    if status.is_completed() {
                        break status;
                    }
                }
                Err(e) if is_transient(&e) => {
                    warn!("status request failed, will retry: {}", e);
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                break SubmissionStatus::Timeout;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval.min(deadline - now)) => {}
                _ = cancel.cancelled() => break SubmissionStatus::Timeout,
            }
        };

        if let Some(progress) = progress {
            progress.set_title(format!("submission {}: {}", id, status));
            progress.finish();
        }

        Ok(status)
    }

    /// Start a submission and, when configured, wait for its verdict.
    ///
    /// Verdicts other than `Accepted` come back with the developer log.
    pub async fn notarize(
        &mut self,
        payload: &Payload,
        uploader: &dyn PayloadUploader,
        cancel: &CancellationToken,
    ) -> Result<NotarizationResult, QuillError> {
        self.start(payload, uploader, cancel).await?;

        let status = if self.config.wait {
            self.wait(cancel).await?
        } else {
            SubmissionStatus::Pending
        };

        // Timeout covers cancellation, after which Apple isn't contacted again.
        let verdict = matches!(status, SubmissionStatus::Invalid | SubmissionStatus::Rejected);

        let log = if verdict && !cancel.is_cancelled() {
            let res = tokio::select! {
                res = self.logs() => Some(res),
                _ = cancel.cancelled() => None,
            };

            match res {
                Some(Ok(log)) => Some(log),
                Some(Err(e)) => {
                    warn!("unable to fetch developer log: {}", e);
                    None
                }
                None => None,
            }
        } else {
            None
        };

        Ok(NotarizationResult {
            submission_id: self.require_id()?.to_string(),
            status,
            log,
        })
    }
}

/// Refuse binaries that Apple would reject for lacking a real signature.
pub fn ensure_developer_signed(data: &[u8]) -> Result<(), QuillError> {
    for (_, image) in read_images(data)? {
        let sig = image
            .code_signature()?
            .ok_or(QuillError::BinaryNoCodeSignature)?;

        let adhoc = sig
            .code_directory()?
            .map(|cd| cd.flags.contains(CodeSignatureFlags::ADHOC))
            .unwrap_or(true);

        if adhoc || sig.signed_data()?.is_none() {
            return Err(QuillError::NotarizeAdHoc);
        }
    }

    Ok(())
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::{
            app_store_connect::notary_api::{
                ListSubmissionResponse, NewSubmissionResponse, NewSubmissionResponseData,
                SubmissionResponse, SubmissionResponseData, SubmissionResponseDataAttributes,
            },
            event_bus::Event,
            macho::testutil::synthetic_macho_file,
            macho_signing::{MachOSigner, SigningOptions},
            prompt::NoPrompter,
            signing_material::load_pem,
        },
        serde_json::Value,
        std::sync::Mutex,
    };

    /// Replays a scripted sequence of statuses.
    struct MockNotary {
        statuses: Mutex<Vec<SubmissionResponseStatus>>,
        status_calls: Mutex<usize>,
        log_calls: Mutex<usize>,
    }

    impl MockNotary {
        fn new(mut statuses: Vec<SubmissionResponseStatus>) -> Self {
            statuses.reverse();

            Self {
                statuses: Mutex::new(statuses),
                status_calls: Mutex::new(0),
                log_calls: Mutex::new(0),
            }
        }

        fn status_calls(&self) -> usize {
            *self.status_calls.lock().unwrap()
        }

        fn log_calls(&self) -> usize {
            *self.log_calls.lock().unwrap()
        }
    }

    fn response_data(status: SubmissionResponseStatus) -> SubmissionResponseData {
        SubmissionResponseData {
            attributes: SubmissionResponseDataAttributes {
                created_date: "2022-06-08T01:38:09.498Z".into(),
                name: "ls.zip".into(),
                status,
            },
            id: "sub-1".into(),
            r#type: "submissions".into(),
        }
    }

    #[async_trait]
    impl NotaryApi for MockNotary {
        async fn submit(
            &self,
            _sha256: &str,
            _submission_name: &str,
        ) -> Result<NewSubmissionResponse, QuillError> {
            Ok(NewSubmissionResponse {
                data: NewSubmissionResponseData {
                    attributes: NewSubmissionResponseDataAttributes {
                        aws_access_key_id: "key".into(),
                        aws_secret_access_key: "secret".into(),
                        aws_session_token: "token".into(),
                        bucket: "bucket".into(),
                        object: "object".into(),
                    },
                    id: "sub-1".into(),
                    r#type: "newSubmissions".into(),
                },
                meta: Value::Null,
            })
        }

        async fn status(&self, _submission_id: &str) -> Result<SubmissionResponse, QuillError> {
            *self.status_calls.lock().unwrap() += 1;

            let status = self
                .statuses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(SubmissionResponseStatus::InProgress);

            Ok(SubmissionResponse {
                data: response_data(status),
                meta: Value::Null,
            })
        }

        async fn logs(&self, _submission_id: &str) -> Result<String, QuillError> {
            *self.log_calls.lock().unwrap() += 1;

            Ok("{\"issues\": []}".into())
        }

        async fn list(&self) -> Result<ListSubmissionResponse, QuillError> {
            Ok(ListSubmissionResponse {
                data: vec![response_data(SubmissionResponseStatus::Accepted)],
                meta: Value::Null,
            })
        }
    }

    #[derive(Default)]
    struct MockUploader {
        uploads: Mutex<Vec<(String, usize)>>,
    }

    #[async_trait]
    impl PayloadUploader for MockUploader {
        async fn upload(
            &self,
            target: &NewSubmissionResponseDataAttributes,
            payload: &Payload,
        ) -> Result<(), QuillError> {
            self.uploads
                .lock()
                .unwrap()
                .push((target.object.clone(), payload.len()));

            Ok(())
        }
    }

    fn config(poll: u64, timeout: u64) -> StatusConfig {
        StatusConfig {
            poll_interval: Duration::from_secs(poll),
            timeout: Duration::from_secs(timeout),
            wait: true,
        }
    }

    fn payload() -> Payload {
        Payload::from_zip("ls.zip", b"PK\x03\x04".to_vec())
    }

    #[test]
    fn status_totality() {
        use SubmissionStatus::*;

        for status in [Pending, Accepted, Invalid, Rejected, Timeout] {
            assert_eq!(status.is_completed(), status != Pending);
            assert_eq!(status.is_successful(), status == Accepted);
        }

        assert_eq!(
            SubmissionStatus::from(SubmissionResponseStatus::Unknown),
            Pending
        );
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_after_polling() {
        use SubmissionResponseStatus::*;

        let api = MockNotary::new(vec![InProgress, InProgress, Accepted]);
        let uploader = MockUploader::default();
        let bus = EventBus::default();
        let mut events = bus.subscribe();

        let started = Instant::now();

        let mut submission = Submission::new(&api, config(1, 10)).with_events(bus);
        let result = submission
            .notarize(&payload(), &uploader, &CancellationToken::new())
            .await
            .unwrap();

        let elapsed = started.elapsed();

        assert_eq!(result.status, SubmissionStatus::Accepted);
        assert_eq!(result.submission_id, "sub-1");
        assert!(result.log.is_none());
        assert_eq!(api.status_calls(), 3);
        assert_eq!(api.log_calls(), 0);
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed < Duration::from_secs(10));

        assert_eq!(
            *uploader.uploads.lock().unwrap(),
            vec![("object".to_string(), 4)]
        );

        match events.recv().await.unwrap() {
            Event::Task(progress) => assert!(progress.is_done()),
            _ => panic!("expected upload task"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_fetches_log() {
        use SubmissionResponseStatus::*;

        let api = MockNotary::new(vec![InProgress, Invalid]);
        let uploader = MockUploader::default();

        let mut submission = Submission::new(&api, config(1, 10));
        let result = submission
            .notarize(&payload(), &uploader, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, SubmissionStatus::Invalid);
        assert_eq!(result.log.as_deref(), Some("{\"issues\": []}"));
        assert_eq!(api.log_calls(), 1);

        match result.into_result() {
            Err(QuillError::NotarizationFailed { status, log }) => {
                assert_eq!(status, "invalid");
                assert!(log.is_some());
            }
            _ => panic!("expected notarization failure"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn times_out() {
        let api = MockNotary::new(vec![]);

        let submission = Submission::existing(&api, config(10, 25), "sub-1");
        let status = submission.wait(&CancellationToken::new()).await.unwrap();

        assert_eq!(status, SubmissionStatus::Timeout);
        // Polls at 0s, 10s, 20s and once more at the 25s deadline.
        assert_eq!(api.status_calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_polling() {
        let api = MockNotary::new(vec![]);
        let cancel = CancellationToken::new();

        let submission = Submission::existing(&api, config(10, 600), "sub-1");

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(15)).await;
                cancel.cancel();
            })
        };

        let status = submission.wait(&cancel).await.unwrap();
        canceller.await.unwrap();

        assert_eq!(status, SubmissionStatus::Timeout);
        assert_eq!(api.status_calls(), 2);
        assert!(cancel.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_notarize_makes_no_more_calls() {
        let api = MockNotary::new(vec![]);
        let uploader = MockUploader::default();
        let cancel = CancellationToken::new();

        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_secs(15)).await;
                cancel.cancel();
            })
        };

        let mut submission = Submission::new(&api, config(10, 600));
        let result = submission
            .notarize(&payload(), &uploader, &cancel)
            .await
            .unwrap();
        canceller.await.unwrap();

        assert_eq!(result.status, SubmissionStatus::Timeout);
        assert!(result.log.is_none());
        assert_eq!(api.status_calls(), 2);
        assert_eq!(api.log_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_skips_log() {
        let api = MockNotary::new(vec![]);
        let uploader = MockUploader::default();

        let mut submission = Submission::new(&api, config(10, 25));
        let result = submission
            .notarize(&payload(), &uploader, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, SubmissionStatus::Timeout);
        assert_eq!(api.log_calls(), 0);
    }

    #[tokio::test]
    async fn requires_start() {
        let api = MockNotary::new(vec![]);
        let submission = Submission::new(&api, StatusConfig::default());

        assert!(matches!(
            submission.status().await,
            Err(QuillError::SubmissionNotStarted)
        ));
    }

    #[tokio::test]
    async fn transient_errors() {
        let closed = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let client = reqwest::Client::new();

        let connect = client
            .get(format!("http://{}/", closed))
            .send()
            .await
            .unwrap_err();
        assert!(is_transient(&QuillError::Reqwest(connect)));

        let builder = client.get("not a url").build().unwrap_err();
        assert!(!is_transient(&QuillError::Reqwest(builder)));

        let decode = serde_json::from_str::<Value>("{").unwrap_err();
        assert!(!is_transient(&QuillError::SerdeJson(decode)));

        assert!(is_transient(&QuillError::NotaryServer {
            status: "503 Service Unavailable".into(),
            body: String::new(),
        }));
        assert!(!is_transient(&QuillError::NotaryServer {
            status: "404 Not Found".into(),
            body: String::new(),
        }));
    }

    #[test]
    fn token_lifetime_covers_wait() {
        let config = NotaryConfig {
            status: config(10, 15 * 60),
            ..Default::default()
        };

        assert_eq!(config.token_lifetime(), Duration::from_secs(17 * 60));
    }

    #[test]
    fn adhoc_binaries_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = synthetic_macho_file(dir.path(), "hello");

        assert!(matches!(
            ensure_developer_signed(&std::fs::read(&path).unwrap()),
            Err(QuillError::BinaryNoCodeSignature)
        ));

        let options = SigningOptions {
            timestamp_url: None,
            ..SigningOptions::new("hello-id")
        };
        MachOSigner::new(options.clone(), None)
            .sign_path(&path)
            .unwrap();
        assert!(matches!(
            ensure_developer_signed(&std::fs::read(&path).unwrap()),
            Err(QuillError::NotarizeAdHoc)
        ));

        let path = synthetic_macho_file(dir.path(), "signed");
        let material = load_pem(
            &InputSource::Bytes(include_bytes!("testdata/chain.pem").to_vec()),
            &InputSource::Bytes(include_bytes!("testdata/leaf-key.pem").to_vec()),
            None,
            &NoPrompter,
        )
        .unwrap();
        MachOSigner::new(options, Some(&material))
            .sign_path(&path)
            .unwrap();
        ensure_developer_signed(&std::fs::read(&path).unwrap()).unwrap();
    }
}
