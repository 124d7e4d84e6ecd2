//! Chunked file transfer: serial part upload with small/big-file
//! semantics, AES-IGE streaming for secret-chat attachments, thumbnail
//! parts, resumable downloads and cancellation.

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use courier_crypto::aes;
use courier_tl::codes;
use courier_tl::{enums, Serializable, Serializer};
use md5::{Digest, Md5};

use crate::journal::UnconfirmedMessage;
use crate::query::{Query, QueryHandler, QueryPolicy};
use crate::secret_chat::{build_envelope, EnvelopeParams};
use crate::{ExecOption, UserAgent};

/// Fixed part size for uploads and downloads.
pub const MAX_PART_SIZE: usize = 512 * 1024;

/// Files at or above this size use the big-file part API.
pub const BIG_FILE_THRESHOLD: u64 = 16 * 1024 * 1024;

/// The server refuses files with more parts than this.
pub const MAX_PARTS: u64 = 3000;

const CODE_SEND_ENCRYPTED_FILE: u32 = 0x9a901b66;

// ─── Math helpers ────────────────────────────────────────────────────────────

pub fn total_parts(size: u64, part_size: usize) -> i32 {
    ((size + part_size as u64 - 1) / part_size as u64) as i32
}

pub fn uses_big_file_api(size: u64) -> bool {
    size >= BIG_FILE_THRESHOLD
}

/// 32-bit fingerprint of an encrypted file's key material:
/// `md5(key ‖ iv)` folded with xor.
pub fn encrypted_fingerprint(key: &[u8; 32], iv: &[u8; 32]) -> i32 {
    let mut hasher = Md5::new();
    hasher.update(key);
    hasher.update(iv);
    let digest: [u8; 16] = hasher.finalize().into();
    let a = i32::from_le_bytes(digest[0..4].try_into().unwrap());
    let b = i32::from_le_bytes(digest[4..8].try_into().unwrap());
    a ^ b
}

/// Pad (final short part only) and encrypt one upload part in place,
/// advancing the running IV.
pub fn prepare_encrypted_part(bytes: &mut Vec<u8>, key: &[u8; 32], iv: &mut [u8; 32]) {
    let tail = bytes.len() % 16;
    if tail != 0 {
        let mut rnd = [0u8; 16];
        getrandom::getrandom(&mut rnd).expect("system rng unavailable");
        bytes.extend_from_slice(&rnd[..16 - tail]);
    }
    aes::ige_encrypt_chained(bytes, key, iv);
}

/// A download against an existing local file of sufficient size completes
/// without touching the network.
pub fn already_downloaded(existing_len: u64, expected_size: i32) -> bool {
    existing_len >= expected_size.max(0) as u64
}

// ─── Status plumbing ─────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub enum TransferStatus {
    Uploading { progress: f32 },
    UploadSucceeded { message_id: i64 },
    Downloading { progress: f32 },
    Downloaded { path: PathBuf },
    Failed,
    Cancelled,
}

pub type StatusCallback = Arc<dyn Fn(TransferStatus) + Send + Sync>;
/// Called synchronously per part for up to `part_size` bytes; an empty
/// vector means EOF.
pub type ReadCallback = Box<dyn FnMut(usize) -> io::Result<Vec<u8>> + Send>;
/// Resource-release hook, runs exactly once when the pipeline finishes.
pub type DoneCallback = Box<dyn FnOnce() + Send>;

// ─── Upload model ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DocumentKind {
    Image,
    AnimatedImage,
    Video,
    Audio,
    Sticker,
    Unknown,
}

impl DocumentKind {
    /// Infer from the file extension, the way the original pipeline keyed
    /// off mime helpers.
    pub fn from_file_name(name: &str) -> Self {
        let ext = name.rsplit('.').next().unwrap_or("").to_ascii_lowercase();
        match ext.as_str() {
            "jpg" | "jpeg" | "png" | "webp" | "bmp" => Self::Image,
            "gif" => Self::AnimatedImage,
            "mp4" | "mov" | "avi" | "mkv" | "webm" => Self::Video,
            "mp3" | "ogg" | "oga" | "flac" | "wav" | "m4a" => Self::Audio,
            "tgs" => Self::Sticker,
            _ => Self::Unknown,
        }
    }
}

#[derive(Clone, Debug)]
pub struct UploadDocument {
    pub file_name: String,
    pub size: u64,
    pub mime_type: String,
    pub kind: DocumentKind,
    pub as_photo: bool,
    pub width: i32,
    pub height: i32,
    pub duration: i32,
    pub caption: String,
    pub thumb: Vec<u8>,
    pub thumb_width: i32,
    pub thumb_height: i32,
}

#[derive(Clone, Debug)]
pub enum UploadTarget {
    Peer(enums::InputPeer),
    SecretChat(i32),
    ProfilePhoto,
    ChatPhoto(i32),
}

struct SecretMaterial {
    key: [u8; 32],
    /// Running IV, mutated part by part.
    iv: [u8; 32],
    /// The IV as of part 0, declared to the receiver.
    init_iv: [u8; 32],
}

impl Drop for SecretMaterial {
    fn drop(&mut self) {
        self.key.fill(0);
        self.iv.fill(0);
        self.init_iv.fill(0);
    }
}

pub struct UploadTask {
    pub file_id: i64,
    /// Local message id, also the cancellation handle.
    pub message_id: i64,
    target: UploadTarget,
    doc: UploadDocument,
    part_size: usize,
    total_parts: i32,
    part_num: AtomicI32,
    offset: AtomicU64,
    at_eof: AtomicBool,
    thumb_id: AtomicI64,
    cancelled: AtomicBool,
    secret: Mutex<Option<SecretMaterial>>,
    read: Mutex<Option<ReadCallback>>,
    status: StatusCallback,
    done: Mutex<Option<DoneCallback>>,
}

impl UploadTask {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn is_encrypted(&self) -> bool {
        matches!(self.target, UploadTarget::SecretChat(_))
    }

    fn is_big(&self) -> bool {
        uses_big_file_api(self.doc.size)
    }

    fn run_done(&self) {
        if let Some(done) = self.done.lock().unwrap().take() {
            done();
        }
    }
}

// ─── Download model ──────────────────────────────────────────────────────────

pub struct DownloadTask {
    pub id: i32,
    dc_id: i32,
    location: enums::InputFileLocation,
    size: i32,
    offset: AtomicI32,
    path: PathBuf,
    cancelled: AtomicBool,
    secret: Mutex<Option<SecretMaterial>>,
    status: StatusCallback,
}

impl DownloadTask {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

// ─── Manager ─────────────────────────────────────────────────────────────────

pub struct TransferManager {
    download_dir: PathBuf,
    uploads: Mutex<HashMap<i64, Arc<UploadTask>>>,
    downloads: Mutex<HashMap<i32, Arc<DownloadTask>>>,
    next_download_id: AtomicI32,
}

impl TransferManager {
    pub fn new(download_dir: PathBuf) -> Self {
        Self {
            download_dir,
            uploads: Mutex::new(HashMap::new()),
            downloads: Mutex::new(HashMap::new()),
            next_download_id: AtomicI32::new(1),
        }
    }

    pub fn cancel_upload(&self, message_id: i64) {
        if let Some(task) = self.uploads.lock().unwrap().get(&message_id) {
            task.cancel();
        }
    }

    pub fn cancel_download(&self, id: i32) {
        if let Some(task) = self.downloads.lock().unwrap().get(&id) {
            task.cancel();
        }
    }

    fn file_path_for(&self, location: &enums::InputFileLocation) -> PathBuf {
        let key = match location {
            enums::InputFileLocation::Location { volume_id, local_id, secret: _ } => {
                format!("{volume_id}_{local_id}")
            }
            enums::InputFileLocation::Document { id, .. } => format!("doc_{id}"),
            enums::InputFileLocation::Encrypted { id, .. } => format!("enc_{id}"),
        };
        self.download_dir.join(format!("download_{key}"))
    }
}

// ─── Upload pipeline ─────────────────────────────────────────────────────────

impl UserAgent {
    /// Start an upload. Returns the local message id, which is also the
    /// cancellation handle. `read` is called synchronously per part.
    pub fn upload_document(
        &self,
        target: UploadTarget,
        doc: UploadDocument,
        read: ReadCallback,
        status: StatusCallback,
        done: DoneCallback,
    ) -> Option<i64> {
        if total_parts(doc.size, MAX_PART_SIZE) as u64 > MAX_PARTS {
            log::error!("[transfer] {} too large ({} bytes)", doc.file_name, doc.size);
            status(TransferStatus::Failed);
            done();
            return None;
        }

        let secret = if matches!(target, UploadTarget::SecretChat(_)) {
            let mut key = [0u8; 32];
            let mut iv = [0u8; 32];
            getrandom::getrandom(&mut key).expect("system rng unavailable");
            getrandom::getrandom(&mut iv).expect("system rng unavailable");
            Some(SecretMaterial { key, iv, init_iv: iv })
        } else {
            None
        };

        let task = Arc::new(UploadTask {
            file_id: random_i64(),
            message_id: random_i64(),
            part_size: MAX_PART_SIZE,
            total_parts: total_parts(doc.size, MAX_PART_SIZE),
            part_num: AtomicI32::new(0),
            offset: AtomicU64::new(0),
            at_eof: AtomicBool::new(false),
            thumb_id: AtomicI64::new(0),
            cancelled: AtomicBool::new(false),
            secret: Mutex::new(secret),
            read: Mutex::new(Some(read)),
            status,
            done: Mutex::new(Some(done)),
            target,
            doc,
        });
        let message_id = task.message_id;
        self.transfers().uploads.lock().unwrap().insert(message_id, task.clone());

        log::info!(
            "[transfer] uploading {} ({} bytes, {} parts{})",
            task.doc.file_name,
            task.doc.size,
            task.total_parts,
            if task.is_encrypted() { ", encrypted" } else { "" }
        );

        if !task.is_encrypted() && !task.doc.thumb.is_empty() {
            self.upload_thumb(task);
        } else {
            self.upload_next_part(task);
        }
        Some(message_id)
    }

    fn upload_thumb(&self, task: Arc<UploadTask>) {
        if task.doc.thumb.len() > MAX_PART_SIZE {
            log::error!("[transfer] thumbnail larger than one part");
            self.finish_upload(&task, TransferStatus::Failed);
            return;
        }
        let thumb_id = random_i64();
        task.thumb_id.store(thumb_id, Ordering::Relaxed);
        let request = courier_tl::functions::upload::SaveFilePart {
            file_id: thumb_id,
            file_part: 0,
            bytes: task.doc.thumb.clone(),
        };
        let query = Query::new(
            "upload thumb part",
            request.to_bytes(),
            QueryPolicy::default(),
            Box::new(UploadPartHandler { task }),
        );
        self.spawn_on_working_dc(query);
    }

    pub(crate) fn upload_next_part(&self, task: Arc<UploadTask>) {
        if task.is_cancelled() {
            self.finish_upload(&task, TransferStatus::Cancelled);
            return;
        }
        if task.at_eof.load(Ordering::Acquire) {
            self.upload_end(task);
            return;
        }

        let mut bytes = {
            let mut read = task.read.lock().unwrap();
            let Some(cb) = read.as_mut() else {
                return;
            };
            match cb(task.part_size) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::error!("[transfer] read callback failed: {e}");
                    drop(read);
                    self.finish_upload(&task, TransferStatus::Failed);
                    return;
                }
            }
        };
        if bytes.is_empty() {
            log::warn!("[transfer] empty read before declared size");
            self.finish_upload(&task, TransferStatus::Failed);
            return;
        }

        let read_len = bytes.len() as u64;
        let offset = task.offset.fetch_add(read_len, Ordering::AcqRel) + read_len;
        if offset >= task.doc.size {
            task.at_eof.store(true, Ordering::Release);
        }

        if task.is_encrypted() {
            let mut secret = task.secret.lock().unwrap();
            let material = secret.as_mut().expect("secret upload without key material");
            let key = material.key;
            prepare_encrypted_part(&mut bytes, &key, &mut material.iv);
        }

        let part = task.part_num.fetch_add(1, Ordering::AcqRel);
        let request_bytes = if task.is_big() {
            courier_tl::functions::upload::SaveBigFilePart {
                file_id: task.file_id,
                file_part: part,
                file_total_parts: task.total_parts,
                bytes,
            }
            .to_bytes()
        } else {
            courier_tl::functions::upload::SaveFilePart {
                file_id: task.file_id,
                file_part: part,
                bytes,
            }
            .to_bytes()
        };

        let query = Query::new(
            "upload part",
            request_bytes,
            QueryPolicy::default(),
            Box::new(UploadPartHandler { task }),
        );
        self.spawn_on_working_dc(query);
    }

    fn upload_end(&self, task: Arc<UploadTask>) {
        if task.is_cancelled() {
            self.finish_upload(&task, TransferStatus::Cancelled);
            return;
        }
        log::info!("[transfer] all parts of {} sent", task.doc.file_name);

        match &task.target {
            UploadTarget::SecretChat(chat_id) => self.finish_secret_upload(&task, *chat_id),
            UploadTarget::Peer(peer) => self.finish_plain_upload(&task, peer.clone()),
            UploadTarget::ProfilePhoto => {
                let request = courier_tl::functions::photos::UploadProfilePhoto {
                    file: self.input_file_for(&task),
                    caption: task.doc.caption.clone(),
                };
                let query = Query::new(
                    "upload profile photo",
                    request.to_bytes(),
                    QueryPolicy::default(),
                    Box::new(UploadFinalHandler { task: task.clone() }),
                );
                self.spawn_on_working_dc(query);
            }
            UploadTarget::ChatPhoto(chat_id) => {
                let request = courier_tl::functions::messages::EditChatPhoto {
                    chat_id: *chat_id,
                    photo: enums::InputChatPhoto::Uploaded { file: self.input_file_for(&task) },
                };
                let query = Query::new(
                    "edit chat photo",
                    request.to_bytes(),
                    QueryPolicy::default(),
                    Box::new(UploadFinalHandler { task: task.clone() }),
                );
                self.spawn_on_working_dc(query);
            }
        }
    }

    fn input_file_for(&self, task: &UploadTask) -> enums::InputFile {
        if task.is_big() {
            enums::InputFile::Big {
                id: task.file_id,
                parts: task.total_parts,
                name: task.doc.file_name.clone(),
            }
        } else {
            enums::InputFile::File {
                id: task.file_id,
                parts: task.total_parts,
                name: task.doc.file_name.clone(),
                md5_checksum: String::new(),
            }
        }
    }

    fn finish_plain_upload(&self, task: &Arc<UploadTask>, peer: enums::InputPeer) {
        let file = self.input_file_for(task);
        let media = if task.doc.as_photo {
            enums::InputMedia::UploadedPhoto { file, caption: task.doc.caption.clone() }
        } else {
            let attributes = document_attributes(&task.doc);
            if task.thumb_id.load(Ordering::Relaxed) != 0 {
                enums::InputMedia::UploadedThumbDocument {
                    file,
                    thumb: enums::InputFile::File {
                        id: task.thumb_id.load(Ordering::Relaxed),
                        parts: 1,
                        name: "thumb.jpg".into(),
                        md5_checksum: String::new(),
                    },
                    mime_type: task.doc.mime_type.clone(),
                    attributes,
                    caption: task.doc.caption.clone(),
                }
            } else {
                enums::InputMedia::UploadedDocument {
                    file,
                    mime_type: task.doc.mime_type.clone(),
                    attributes,
                    caption: task.doc.caption.clone(),
                }
            }
        };

        let request = courier_tl::functions::messages::SendMedia {
            peer,
            reply_to_msg_id: None,
            media,
            random_id: task.message_id,
        };
        let query = Query::new(
            "send media",
            request.to_bytes(),
            QueryPolicy::default(),
            Box::new(UploadFinalHandler { task: task.clone() }),
        );
        self.spawn_on_working_dc(query);
    }

    fn finish_secret_upload(&self, task: &Arc<UploadTask>, chat_id: i32) {
        let Some(chat) = self.secret_chat(chat_id) else {
            log::error!("[transfer] secret chat {chat_id} vanished");
            self.finish_upload(task, TransferStatus::Failed);
            return;
        };

        let (key, init_iv) = {
            let secret = task.secret.lock().unwrap();
            let material = secret.as_ref().expect("secret upload without key material");
            (material.key, material.init_iv)
        };
        let fingerprint = encrypted_fingerprint(&key, &init_iv);

        let media = build_secret_media(&task.doc, &key, &init_iv);
        let our_id = self.our_id();
        let envelope = build_envelope(&EnvelopeParams {
            layer: chat.layer(),
            raw_in_seq_no: chat.raw_in_seq_no(our_id),
            raw_out_seq_no: chat.raw_out_seq_no(our_id),
            random_id: task.message_id,
            ttl: chat.ttl(),
            text: String::new(),
            media: Some(media),
        });

        let file = if task.is_big() {
            enums::InputEncryptedFile::BigUploaded {
                id: task.file_id,
                parts: task.total_parts,
                key_fingerprint: fingerprint,
            }
        } else {
            enums::InputEncryptedFile::Uploaded {
                id: task.file_id,
                parts: task.total_parts,
                md5_checksum: String::new(),
                key_fingerprint: fingerprint,
            }
        };

        // journal both blobs so a crash replays the exact same message
        let mut file_blob = Vec::new();
        file.serialize(&mut file_blob);
        let record = UnconfirmedMessage {
            message_id: task.message_id,
            constructor: CODE_SEND_ENCRYPTED_FILE,
            date: unix_now(),
            blobs: vec![envelope.clone(), file_blob],
        };
        if let Err(e) = self.journal_for(chat_id).append(&record) {
            log::warn!("[transfer] journal append failed: {e}");
        }
        chat.bump_out_seq_no();

        self.send_secret_payload(&chat, task.message_id, &envelope, Some(file));
        self.finish_upload(task, TransferStatus::UploadSucceeded { message_id: task.message_id });
    }

    fn finish_upload(&self, task: &Arc<UploadTask>, status: TransferStatus) {
        self.transfers().uploads.lock().unwrap().remove(&task.message_id);
        (task.status)(status);
        task.run_done();
    }

    fn spawn_on_working_dc(&self, query: Arc<Query>) {
        let ua = self.clone();
        tokio::spawn(async move {
            let dc = ua.working_dc();
            ua.execute(query, dc, ExecOption::Default).await;
        });
    }

    // ── Download pipeline ──────────────────────────────────────────────────

    /// Start a download. For secret-chat attachments pass the key material
    /// and declared fingerprint; a fingerprint mismatch fails before any
    /// network traffic.
    pub fn download_file(
        &self,
        dc_id: i32,
        location: enums::InputFileLocation,
        size: i32,
        secret: Option<([u8; 32], [u8; 32], i32)>,
        status: StatusCallback,
    ) -> Option<i32> {
        let material = match secret {
            Some((key, iv, declared_fingerprint)) => {
                if encrypted_fingerprint(&key, &iv) != declared_fingerprint {
                    log::error!("[transfer] encrypted file fingerprint mismatch");
                    status(TransferStatus::Failed);
                    return None;
                }
                Some(SecretMaterial { key, iv, init_iv: iv })
            }
            None => None,
        };

        let manager = self.transfers();
        let id = manager.next_download_id.fetch_add(1, Ordering::Relaxed);
        let task = Arc::new(DownloadTask {
            id,
            dc_id,
            path: manager.file_path_for(&location),
            location,
            size,
            offset: AtomicI32::new(0),
            cancelled: AtomicBool::new(false),
            secret: Mutex::new(material),
            status,
        });
        manager.downloads.lock().unwrap().insert(id, task.clone());
        self.download_next_part(task);
        Some(id)
    }

    pub(crate) fn download_next_part(&self, task: Arc<DownloadTask>) {
        if task.is_cancelled() {
            self.end_download(&task, TransferStatus::Cancelled);
            return;
        }

        if task.offset.load(Ordering::Acquire) == 0 {
            if let Ok(meta) = std::fs::metadata(&task.path) {
                if already_downloaded(meta.len(), task.size) {
                    log::info!("[transfer] {} already present", task.path.display());
                    self.end_download(&task, TransferStatus::Downloaded { path: task.path.clone() });
                    return;
                }
            }
        }

        let request = courier_tl::functions::upload::GetFile {
            location: task.location.clone(),
            offset: task.offset.load(Ordering::Acquire),
            limit: MAX_PART_SIZE as i32,
        };
        let query = Query::new(
            "get file",
            request.to_bytes(),
            QueryPolicy::default(),
            Box::new(DownloadPartHandler { task: task.clone() }),
        );
        let ua = self.clone();
        let dc_id = task.dc_id;
        tokio::spawn(async move {
            let dc = ua.dc_by_id(dc_id);
            ua.execute(query, dc, ExecOption::Default).await;
        });
    }

    fn append_download_bytes(&self, task: &Arc<DownloadTask>, mut bytes: Vec<u8>) -> io::Result<()> {
        if let Some(material) = task.secret.lock().unwrap().as_mut() {
            let key = material.key;
            aes::ige_decrypt_chained(&mut bytes, &key, &mut material.iv);
        }
        let offset = task.offset.load(Ordering::Acquire);
        let remaining = (task.size - offset).max(0) as usize;
        bytes.truncate(remaining.min(bytes.len()));

        if let Some(parent) = task.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        use std::io::Write;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&task.path)?;
        file.write_all(&bytes)?;
        task.offset.store(offset + bytes.len() as i32, Ordering::Release);
        Ok(())
    }

    fn end_download(&self, task: &Arc<DownloadTask>, status: TransferStatus) {
        self.transfers().downloads.lock().unwrap().remove(&task.id);
        if matches!(status, TransferStatus::Cancelled | TransferStatus::Failed) {
            let _ = std::fs::remove_file(&task.path);
        }
        (task.status)(status);
    }
}

fn document_attributes(doc: &UploadDocument) -> Vec<enums::DocumentAttribute> {
    use enums::DocumentAttribute as Attr;
    match doc.kind {
        DocumentKind::Image => vec![Attr::ImageSize { w: doc.width, h: doc.height }],
        DocumentKind::AnimatedImage => {
            vec![Attr::ImageSize { w: doc.width, h: doc.height }, Attr::Animated]
        }
        DocumentKind::Video => vec![
            Attr::Video { duration: doc.duration, w: doc.width, h: doc.height },
            Attr::Filename { file_name: doc.file_name.clone() },
        ],
        DocumentKind::Audio => vec![
            Attr::Audio { duration: doc.duration },
            Attr::Filename { file_name: doc.file_name.clone() },
        ],
        DocumentKind::Sticker => vec![Attr::Sticker],
        DocumentKind::Unknown => vec![Attr::Filename { file_name: doc.file_name.clone() }],
    }
}

/// Serialize the `DecryptedMessageMedia` blob for a secret attachment.
/// Thumb bytes are carried inline; the key and the *initial* IV are
/// declared so the receiver can decrypt the part stream.
fn build_secret_media(doc: &UploadDocument, key: &[u8; 32], init_iv: &[u8; 32]) -> Vec<u8> {
    let mut s = Serializer::new();
    if doc.as_photo {
        s.out_u32(codes::MEDIA_PHOTO);
    } else {
        match doc.kind {
            DocumentKind::Video => s.out_u32(codes::MEDIA_VIDEO),
            DocumentKind::Audio => s.out_u32(codes::MEDIA_AUDIO),
            _ => s.out_u32(codes::MEDIA_DOCUMENT),
        }
    }

    let has_thumb = doc.as_photo || doc.kind != DocumentKind::Audio;
    if has_thumb {
        s.out_bytes(&doc.thumb);
        s.out_i32(doc.thumb_width);
        s.out_i32(doc.thumb_height);
    }

    if doc.as_photo {
        s.out_i32(doc.width);
        s.out_i32(doc.height);
    } else {
        match doc.kind {
            DocumentKind::Video => {
                s.out_i32(doc.duration);
                s.out_string(&doc.mime_type);
                s.out_i32(doc.width);
                s.out_i32(doc.height);
            }
            DocumentKind::Audio => {
                s.out_i32(doc.duration);
                s.out_string(&doc.mime_type);
            }
            _ => {
                s.out_string(&doc.file_name);
                s.out_string(&doc.mime_type);
            }
        }
    }

    s.out_i32(doc.size as i32);
    s.out_bytes(key);
    s.out_bytes(init_iv);
    s.out_string(&doc.caption);
    s.into_bytes()
}

fn random_i64() -> i64 {
    let mut b = [0u8; 8];
    getrandom::getrandom(&mut b).expect("system rng unavailable");
    i64::from_le_bytes(b)
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

// ─── Handlers ────────────────────────────────────────────────────────────────

struct UploadPartHandler {
    task: Arc<UploadTask>,
}

impl QueryHandler for UploadPartHandler {
    fn on_answer(&self, ua: &UserAgent, _body: &[u8]) {
        let progress = if self.task.doc.size == 0 {
            1.0
        } else {
            self.task.offset.load(Ordering::Acquire) as f32 / self.task.doc.size as f32
        };
        (self.task.status)(TransferStatus::Uploading { progress });
        ua.upload_next_part(self.task.clone());
    }

    fn on_error(&self, ua: &UserAgent, code: i32, text: &str) {
        log::error!("[transfer] part upload failed: {code} {text}");
        ua.finish_upload(&self.task, TransferStatus::Failed);
    }
}

struct UploadFinalHandler {
    task: Arc<UploadTask>,
}

impl QueryHandler for UploadFinalHandler {
    fn on_answer(&self, ua: &UserAgent, _body: &[u8]) {
        ua.finish_upload(
            &self.task,
            TransferStatus::UploadSucceeded { message_id: self.task.message_id },
        );
    }

    fn on_error(&self, ua: &UserAgent, code: i32, text: &str) {
        log::error!("[transfer] finalizer failed: {code} {text}");
        ua.finish_upload(&self.task, TransferStatus::Failed);
    }
}

struct DownloadPartHandler {
    task: Arc<DownloadTask>,
}

impl QueryHandler for DownloadPartHandler {
    fn on_answer(&self, ua: &UserAgent, body: &[u8]) {
        use courier_tl::schema::upload::File;
        use courier_tl::Deserializable;

        let bytes = match File::from_bytes(body) {
            Ok(File::File { mtime: _, bytes }) => bytes,
            Err(e) => {
                log::error!("[transfer] bad getFile answer: {e}");
                ua.end_download(&self.task, TransferStatus::Failed);
                return;
            }
        };

        if let Err(e) = ua.append_download_bytes(&self.task, bytes) {
            log::error!("[transfer] write failed for {}: {e}", self.task.path.display());
            ua.end_download(&self.task, TransferStatus::Failed);
            return;
        }

        let offset = self.task.offset.load(Ordering::Acquire);
        if offset < self.task.size {
            (self.task.status)(TransferStatus::Downloading {
                progress: offset as f32 / self.task.size.max(1) as f32,
            });
            ua.download_next_part(self.task.clone());
        } else {
            ua.end_download(
                &self.task,
                TransferStatus::Downloaded { path: self.task.path.clone() },
            );
        }
    }

    fn on_error(&self, ua: &UserAgent, code: i32, text: &str) {
        log::error!("[transfer] getFile failed: {code} {text}");
        ua.end_download(&self.task, TransferStatus::Failed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn big_file_threshold_and_part_math() {
        // 16 MiB + 1 byte at 512 KiB parts: 33 parts, big-file API
        let size = BIG_FILE_THRESHOLD + 1;
        assert!(uses_big_file_api(size));
        assert_eq!(total_parts(size, MAX_PART_SIZE), 33);

        // just below the threshold stays on the small-file API
        assert!(!uses_big_file_api(BIG_FILE_THRESHOLD - 1));
        assert_eq!(total_parts(BIG_FILE_THRESHOLD, MAX_PART_SIZE), 32);
        assert_eq!(total_parts(1, MAX_PART_SIZE), 1);
        assert_eq!(total_parts(MAX_PART_SIZE as u64, MAX_PART_SIZE), 1);
        assert_eq!(total_parts(MAX_PART_SIZE as u64 + 1, MAX_PART_SIZE), 2);
    }

    #[test]
    fn encrypted_parts_reassemble_to_the_whole_image() {
        let key = [7u8; 32];
        let iv = [9u8; 32];
        let data: Vec<u8> = (0..100_000u32).map(|i| (i % 251) as u8).collect();

        // encrypt the whole padded input in one shot
        let mut whole = data.clone();
        let pad = (16 - whole.len() % 16) % 16;
        whole.extend(std::iter::repeat(0xAB).take(pad));
        let mut one_shot = whole.clone();
        aes::ige_encrypt(&mut one_shot, &key, &iv);

        // encrypt part by part the way the upload pipeline does
        let mut reassembled = Vec::new();
        let mut running_iv = iv;
        for chunk in whole.chunks(4096) {
            let mut part = chunk.to_vec();
            prepare_encrypted_part(&mut part, &key, &mut running_iv);
            reassembled.extend(part);
        }
        assert_eq!(reassembled, one_shot);
    }

    #[test]
    fn final_short_part_is_padded_to_block_size() {
        let key = [1u8; 32];
        let mut iv = [2u8; 32];
        let mut part = vec![0x55u8; 100];
        prepare_encrypted_part(&mut part, &key, &mut iv);
        assert_eq!(part.len(), 112);
    }

    #[test]
    fn fingerprint_folds_md5() {
        let key = [3u8; 32];
        let iv = [4u8; 32];
        let mut hasher = Md5::new();
        hasher.update(key);
        hasher.update(iv);
        let digest: [u8; 16] = hasher.finalize().into();
        let expected = i32::from_le_bytes(digest[0..4].try_into().unwrap())
            ^ i32::from_le_bytes(digest[4..8].try_into().unwrap());
        assert_eq!(encrypted_fingerprint(&key, &iv), expected);
    }

    #[test]
    fn local_file_resume_decision() {
        assert!(already_downloaded(1000, 1000));
        assert!(already_downloaded(2000, 1000));
        assert!(!already_downloaded(999, 1000));
    }

    #[test]
    fn document_kind_from_extension() {
        assert_eq!(DocumentKind::from_file_name("a.jpg"), DocumentKind::Image);
        assert_eq!(DocumentKind::from_file_name("b.gif"), DocumentKind::AnimatedImage);
        assert_eq!(DocumentKind::from_file_name("c.mp4"), DocumentKind::Video);
        assert_eq!(DocumentKind::from_file_name("d.mp3"), DocumentKind::Audio);
        assert_eq!(DocumentKind::from_file_name("archive.tar.gz"), DocumentKind::Unknown);
    }
}
