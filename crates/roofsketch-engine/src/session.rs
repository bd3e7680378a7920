use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;

use anyhow::{Context, Result};
use roofsketch_contracts::credentials::Credential;
use roofsketch_contracts::events::{EventKind, EventWriter};
use roofsketch_contracts::history::SessionHistory;
use roofsketch_contracts::material::RoofMaterial;
use roofsketch_contracts::payload::{GeneratedImage, UploadedImage};
use serde_json::{json, Value};

use crate::gemini::{GenerationError, SketchProvider, SketchRequest, GENERIC_FAILURE};
use crate::validator::{validate, RawFile, ValidationError};

/// Seam for the validation step so callers can swap in their own probe.
pub trait UploadValidator: Send + Sync {
    fn validate(&self, file: &RawFile) -> Result<UploadedImage, ValidationError>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ImageValidator;

impl UploadValidator for ImageValidator {
    fn validate(&self, file: &RawFile) -> Result<UploadedImage, ValidationError> {
        validate(file)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadState {
    Empty,
    Validating,
    Ready(UploadedImage),
    Rejected(ValidationError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GenerationAttempt {
    Idle,
    Loading,
    Success(GeneratedImage),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerateOutcome {
    Started,
    /// No credential; the caller should send the user to credential entry.
    CredentialRequired,
    /// No validated upload, or validation still pending or failed.
    NotReady,
    AlreadyLoading,
}

enum Completion {
    Validation {
        token: u64,
        result: Result<UploadedImage, ValidationError>,
    },
    Generation {
        token: u64,
        result: Result<GeneratedImage, GenerationError>,
    },
}

/// Upload + generation state for one user session.
///
/// All state lives on the owning thread. Validation and generation run on
/// short-lived worker threads and report back through a channel; each report
/// carries the token that was current when the work started and is dropped if
/// a newer file selection or generation has superseded it. Completions are
/// applied only from [`SketchSession::poll`], [`SketchSession::wait_one`] and
/// [`SketchSession::settle`].
///
/// The event log is written after each transition and never blocks one: an
/// unwritable log loses lines, not state.
pub struct SketchSession {
    provider: Arc<dyn SketchProvider>,
    validator: Arc<dyn UploadValidator>,
    credential: Credential,
    material: RoofMaterial,
    upload: UploadState,
    attempt: GenerationAttempt,
    history: SessionHistory,
    upload_token: u64,
    generation_token: u64,
    in_flight: usize,
    sender: Sender<Completion>,
    receiver: Receiver<Completion>,
    events: Option<EventWriter>,
}

impl SketchSession {
    pub fn new(provider: Arc<dyn SketchProvider>, credential: Credential) -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            provider,
            validator: Arc::new(ImageValidator),
            credential,
            material: RoofMaterial::default(),
            upload: UploadState::Empty,
            attempt: GenerationAttempt::Idle,
            history: SessionHistory::new(),
            upload_token: 0,
            generation_token: 0,
            in_flight: 0,
            sender,
            receiver,
            events: None,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn UploadValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self.emit(
            EventKind::SessionStarted,
            json!({
                "provider": self.provider.name(),
                "model": self.provider.model(),
                "credential_source": self.credential.source().as_str(),
            }),
        );
        self
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    pub fn set_credential(&mut self, credential: Credential) {
        self.credential = credential;
    }

    pub fn material(&self) -> RoofMaterial {
        self.material
    }

    pub fn set_material(&mut self, material: RoofMaterial) {
        self.material = material;
    }

    pub fn upload(&self) -> &UploadState {
        &self.upload
    }

    pub fn attempt(&self) -> &GenerationAttempt {
        &self.attempt
    }

    pub fn history(&self) -> &SessionHistory {
        &self.history
    }

    pub fn provider(&self) -> &dyn SketchProvider {
        self.provider.as_ref()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Resets upload and generation state, then validates `file` off-thread.
    /// Returns the selection token.
    pub fn select_file(&mut self, file: RawFile) -> Result<u64> {
        self.upload_token += 1;
        self.generation_token += 1;
        self.upload = UploadState::Validating;
        self.attempt = GenerationAttempt::Idle;
        let token = self.upload_token;
        let selected = json!({
            "token": token,
            "name": file.name(),
            "declared_type": file.declared_type(),
        });

        let sender = self.sender.clone();
        let validator = Arc::clone(&self.validator);
        let spawned = thread::Builder::new()
            .name("roofsketch-validate".to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| validator.validate(&file)))
                    .unwrap_or_else(|_| {
                        Err(ValidationError::DecodeError(
                            "validation worker panicked".to_string(),
                        ))
                    });
                let _ = sender.send(Completion::Validation { token, result });
            });
        if let Err(err) = spawned {
            self.upload = UploadState::Rejected(ValidationError::ReadError(err.to_string()));
            return Err(err).context("validation thread spawn failed");
        }
        self.in_flight += 1;
        self.emit(EventKind::UploadSelected, selected);
        Ok(token)
    }

    /// Starts one generation for the current upload. Never starts a second
    /// call while one is loading.
    pub fn generate(&mut self) -> Result<GenerateOutcome> {
        if self.attempt == GenerationAttempt::Loading {
            return Ok(GenerateOutcome::AlreadyLoading);
        }
        if !self.credential.is_present() {
            self.emit(EventKind::CredentialRequired, Value::Null);
            return Ok(GenerateOutcome::CredentialRequired);
        }
        let UploadState::Ready(upload) = &self.upload else {
            return Ok(GenerateOutcome::NotReady);
        };

        let request = SketchRequest {
            credential: self.credential.clone(),
            image_base64: upload.base64(),
            mime_type: upload.mime.as_str().to_string(),
            material: self.material,
        };
        self.generation_token += 1;
        let token = self.generation_token;
        self.attempt = GenerationAttempt::Loading;

        let sender = self.sender.clone();
        let provider = Arc::clone(&self.provider);
        let spawned = thread::Builder::new()
            .name("roofsketch-generate".to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| provider.generate(&request)))
                    .unwrap_or_else(|_| Err(GenerationError::Failed(GENERIC_FAILURE.to_string())));
                let _ = sender.send(Completion::Generation { token, result });
            });
        if let Err(err) = spawned {
            self.attempt = GenerationAttempt::Error(GENERIC_FAILURE.to_string());
            return Err(err).context("generation thread spawn failed");
        }
        self.in_flight += 1;
        self.emit(
            EventKind::SketchStarted,
            json!({
                "token": token,
                "material": self.material.label(),
                "provider": self.provider.name(),
                "model": self.provider.model(),
            }),
        );
        Ok(GenerateOutcome::Started)
    }

    /// Applies every completion that has already arrived. Returns how many were
    /// received, stale ones included.
    pub fn poll(&mut self) -> usize {
        let mut received = 0;
        while let Ok(completion) = self.receiver.try_recv() {
            self.apply(completion);
            received += 1;
        }
        received
    }

    /// Blocks for the next completion. Returns `false` when nothing is in flight.
    pub fn wait_one(&mut self) -> Result<bool> {
        if self.in_flight == 0 {
            return Ok(false);
        }
        let completion = self
            .receiver
            .recv()
            .context("session completion channel closed")?;
        self.apply(completion);
        Ok(true)
    }

    /// Blocks until all in-flight work has reported back.
    pub fn settle(&mut self) -> Result<()> {
        while self.wait_one()? {}
        Ok(())
    }

    fn apply(&mut self, completion: Completion) -> bool {
        self.in_flight = self.in_flight.saturating_sub(1);
        match completion {
            Completion::Validation { token, result } => {
                if token != self.upload_token {
                    self.discard("validation", token, self.upload_token);
                    return false;
                }
                match result {
                    Ok(upload) => {
                        let validated = json!({
                            "token": token,
                            "mime_type": upload.mime.as_str(),
                            "width": upload.width,
                            "height": upload.height,
                            "bytes": upload.bytes.len(),
                        });
                        self.upload = UploadState::Ready(upload);
                        self.emit(EventKind::UploadValidated, validated);
                    }
                    Err(err) => {
                        let rejected = json!({
                            "token": token,
                            "kind": err.kind(),
                            "message": err.to_string(),
                            "detail": err.detail(),
                        });
                        self.upload = UploadState::Rejected(err);
                        self.emit(EventKind::UploadRejected, rejected);
                    }
                }
            }
            Completion::Generation { token, result } => {
                if token != self.generation_token || self.attempt != GenerationAttempt::Loading {
                    self.discard("generation", token, self.generation_token);
                    return false;
                }
                match result {
                    Ok(image) => {
                        let entry_id = self.history.record(image.clone()).id.clone();
                        let mime_type = image.mime_type.clone();
                        self.attempt = GenerationAttempt::Success(image);
                        self.emit(
                            EventKind::SketchSucceeded,
                            json!({
                                "token": token,
                                "entry_id": entry_id,
                                "mime_type": mime_type,
                                "history_len": self.history.len(),
                            }),
                        );
                    }
                    Err(err) => {
                        let failed = json!({
                            "token": token,
                            "kind": err.kind(),
                            "message": err.to_string(),
                        });
                        self.attempt = GenerationAttempt::Error(err.to_string());
                        self.emit(EventKind::SketchFailed, failed);
                    }
                }
            }
        }
        true
    }

    fn discard(&self, kind: &str, token: u64, current: u64) {
        self.emit(
            EventKind::CompletionDiscarded,
            json!({
                "kind": kind,
                "token": token,
                "current_token": current,
            }),
        );
    }

    fn emit(&self, kind: EventKind, payload: Value) {
        if let Some(events) = self.events.as_ref() {
            events.record(kind, payload);
        }
    }
}
