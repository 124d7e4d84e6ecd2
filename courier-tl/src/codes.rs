//! Raw constructor ids for payloads the engine composes by hand through
//! [`crate::Serializer`] — secret-chat envelopes and their media variants,
//! whose exact shape depends on the negotiated layer.

// ── envelopes ────────────────────────────────────────────────────────────────

pub const DECRYPTED_MESSAGE_LAYER: u32 = 0x1be31789;

/// Layer ≥ 46 message: `flags:# random_id:long ttl:int message:string
/// media:flags.9?DecryptedMessageMedia`.
pub const DECRYPTED_MESSAGE: u32 = 0x36b091de;
/// Media-present bit in the layer ≥ 46 flags word.
pub const DECRYPTED_MESSAGE_MEDIA_FLAG: i32 = 1 << 9;

/// Layer 17–45 message: `random_id:long ttl:int message:string media:...`.
pub const DECRYPTED_MESSAGE_LAYER17: u32 = 0x204d3878;
/// Layer 8–16 message: `random_id:long random_bytes:bytes message:string media:...`.
pub const DECRYPTED_MESSAGE_LAYER8: u32 = 0x1f814f1f;

pub const DECRYPTED_MESSAGE_SERVICE_LAYER17: u32 = 0x73164160;
pub const DECRYPTED_MESSAGE_SERVICE_LAYER8: u32 = 0xaa48327d;

// ── media ────────────────────────────────────────────────────────────────────

pub const MEDIA_EMPTY: u32 = 0x089f5c4a;

pub const MEDIA_PHOTO: u32 = 0xf1fa8d78;
pub const MEDIA_PHOTO_LAYER8: u32 = 0x32798a8c;

pub const MEDIA_VIDEO: u32 = 0x970c8c0e;
pub const MEDIA_VIDEO_LAYER17: u32 = 0x524a415d;
pub const MEDIA_VIDEO_LAYER8: u32 = 0x4cee6ef3;

pub const MEDIA_AUDIO: u32 = 0x57e0a9cb;
pub const MEDIA_AUDIO_LAYER8: u32 = 0x6080758f;

pub const MEDIA_DOCUMENT: u32 = 0x7afe8ae2;
pub const MEDIA_DOCUMENT_LAYER8: u32 = 0xb095434b;

// ── service actions ──────────────────────────────────────────────────────────

pub const ACTION_SET_TTL: u32 = 0xa1733aec;
pub const ACTION_RESEND: u32 = 0x511110b0;
pub const ACTION_NOTIFY_LAYER: u32 = 0xf3048883;
pub const ACTION_READ_MESSAGES: u32 = 0x0c4f40be;
pub const ACTION_DELETE_MESSAGES: u32 = 0x65614304;
pub const ACTION_FLUSH_HISTORY: u32 = 0x6719e45c;

// ── shared attribute constructors ────────────────────────────────────────────

pub const DOCUMENT_ATTRIBUTE_FILENAME: u32 = 0x15590068;
pub const DOCUMENT_ATTRIBUTE_IMAGE_SIZE: u32 = 0x6c37c15c;
pub const DOCUMENT_ATTRIBUTE_ANIMATED: u32 = 0x11b58939;
pub const DOCUMENT_ATTRIBUTE_VIDEO: u32 = 0x5910cccb;
pub const DOCUMENT_ATTRIBUTE_AUDIO: u32 = 0x051448e5;
pub const DOCUMENT_ATTRIBUTE_STICKER: u32 = 0x3a556302;

pub const VECTOR: u32 = 0x1cb5c415;
