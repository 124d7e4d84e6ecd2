//! Hand-maintained API schema subset.
//!
//! Only the constructors the client core exercises are modelled; the layout
//! mirrors generated bindings (`types` structs, boxed `enums`, `functions`
//! grouped by namespace) so the subset can later be swapped for a full
//! generator without touching call sites.

use crate::deserialize::{Buffer, Error, Result};
use crate::{Deserializable, Identifiable, RemoteCall, Serializable};

// ═════════════════════════════════════════════════════════════════════════════
// types
// ═════════════════════════════════════════════════════════════════════════════

pub mod types {
    /// `dcOption` — one reachable address of a data center.
    #[derive(Clone, Debug, PartialEq)]
    pub struct DcOption {
        pub id: i32,
        pub ipv6: bool,
        pub media_only: bool,
        pub ip_address: String,
        pub port: i32,
    }

    #[derive(Clone, Debug, PartialEq)]
    pub struct Config {
        pub date: i32,
        pub expires: i32,
        pub this_dc: i32,
        pub dc_options: Vec<DcOption>,
    }

    #[derive(Clone, Debug, PartialEq)]
    pub struct User {
        pub id: i32,
        pub access_hash: i64,
        pub first_name: String,
        pub last_name: String,
        pub phone: String,
    }

    #[derive(Clone, Debug, PartialEq)]
    pub struct Chat {
        pub id: i32,
        pub title: String,
    }

    #[derive(Clone, Debug, PartialEq)]
    pub struct Channel {
        pub id: i32,
        pub access_hash: i64,
        pub title: String,
        /// Channel-local update cursor, carried on the channel record.
        pub pts: i32,
    }

    #[derive(Clone, Debug, PartialEq)]
    pub struct Message {
        pub id: i32,
        pub from_id: i32,
        pub peer: super::enums::Peer,
        pub date: i32,
        pub text: String,
    }

    #[derive(Clone, Debug, PartialEq)]
    pub struct Dialog {
        pub peer: super::enums::Peer,
        pub top_message: i32,
        pub unread_count: i32,
        /// Present on channel dialogs only.
        pub pts: Option<i32>,
    }

    #[derive(Clone, Debug, PartialEq)]
    pub struct UpdatesState {
        pub pts: i32,
        pub qts: i32,
        pub date: i32,
        pub seq: i32,
        pub unread_count: i32,
    }

    #[derive(Clone, Debug, PartialEq)]
    pub struct EncryptedFile {
        pub id: i64,
        pub access_hash: i64,
        pub size: i32,
        pub dc_id: i32,
        pub key_fingerprint: i32,
    }

    #[derive(Clone, Debug, PartialEq)]
    pub struct EncryptedChatData {
        pub id: i32,
        pub access_hash: i64,
        pub date: i32,
        pub admin_id: i32,
        pub participant_id: i32,
        /// `g_a` on `Requested`, `g_a_or_b` on `Chat`, empty otherwise.
        pub key_material: Vec<u8>,
        /// Only meaningful on the established `Chat` variant.
        pub key_fingerprint: i64,
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// enums
// ═════════════════════════════════════════════════════════════════════════════

pub mod enums {
    use super::*;

    // ── Peer ───────────────────────────────────────────────────────────────

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub enum Peer {
        User { user_id: i32 },
        Chat { chat_id: i32 },
        Channel { channel_id: i32 },
    }

    pub(crate) const ID_PEER_USER: u32 = 0x9db1bc6d;
    pub(crate) const ID_PEER_CHAT: u32 = 0xbad0e5bb;
    pub(crate) const ID_PEER_CHANNEL: u32 = 0xbddde532;

    impl Serializable for Peer {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            match self {
                Self::User { user_id } => {
                    ID_PEER_USER.serialize(buf);
                    user_id.serialize(buf);
                }
                Self::Chat { chat_id } => {
                    ID_PEER_CHAT.serialize(buf);
                    chat_id.serialize(buf);
                }
                Self::Channel { channel_id } => {
                    ID_PEER_CHANNEL.serialize(buf);
                    channel_id.serialize(buf);
                }
            }
        }
    }

    impl Deserializable for Peer {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                ID_PEER_USER => Ok(Self::User { user_id: i32::deserialize(buf)? }),
                ID_PEER_CHAT => Ok(Self::Chat { chat_id: i32::deserialize(buf)? }),
                ID_PEER_CHANNEL => Ok(Self::Channel { channel_id: i32::deserialize(buf)? }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    // ── InputPeer / InputUser / InputChannel ───────────────────────────────

    #[derive(Clone, Debug, PartialEq)]
    pub enum InputPeer {
        Empty,
        SelfPeer,
        User { user_id: i32, access_hash: i64 },
        Chat { chat_id: i32 },
        Channel { channel_id: i32, access_hash: i64 },
    }

    impl Serializable for InputPeer {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            match self {
                Self::Empty => 0x7f3b18eau32.serialize(buf),
                Self::SelfPeer => 0x7da07ec9u32.serialize(buf),
                Self::User { user_id, access_hash } => {
                    0x7b8e7de6u32.serialize(buf);
                    user_id.serialize(buf);
                    access_hash.serialize(buf);
                }
                Self::Chat { chat_id } => {
                    0x179be863u32.serialize(buf);
                    chat_id.serialize(buf);
                }
                Self::Channel { channel_id, access_hash } => {
                    0x20adaef8u32.serialize(buf);
                    channel_id.serialize(buf);
                    access_hash.serialize(buf);
                }
            }
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    pub enum InputUser {
        SelfUser,
        User { user_id: i32, access_hash: i64 },
    }

    impl Serializable for InputUser {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            match self {
                Self::SelfUser => 0xf7c1b13fu32.serialize(buf),
                Self::User { user_id, access_hash } => {
                    0xd8292816u32.serialize(buf);
                    user_id.serialize(buf);
                    access_hash.serialize(buf);
                }
            }
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    pub struct InputChannel {
        pub channel_id: i32,
        pub access_hash: i64,
    }

    impl Serializable for InputChannel {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            0xafeb712eu32.serialize(buf);
            self.channel_id.serialize(buf);
            self.access_hash.serialize(buf);
        }
    }

    // ── User / Chat ────────────────────────────────────────────────────────

    pub(crate) const ID_USER_EMPTY: u32 = 0x200250ba;
    pub(crate) const ID_USER: u32 = 0x22e49072;

    #[derive(Clone, Debug, PartialEq)]
    pub enum User {
        Empty { id: i32 },
        User(types::User),
    }

    impl User {
        pub fn id(&self) -> i32 {
            match self {
                Self::Empty { id } => *id,
                Self::User(u) => u.id,
            }
        }
    }

    impl Deserializable for User {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                ID_USER_EMPTY => Ok(Self::Empty { id: i32::deserialize(buf)? }),
                ID_USER => Ok(Self::User(types::User {
                    id: i32::deserialize(buf)?,
                    access_hash: i64::deserialize(buf)?,
                    first_name: String::deserialize(buf)?,
                    last_name: String::deserialize(buf)?,
                    phone: String::deserialize(buf)?,
                })),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    impl Serializable for User {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            match self {
                Self::Empty { id } => {
                    ID_USER_EMPTY.serialize(buf);
                    id.serialize(buf);
                }
                Self::User(u) => {
                    ID_USER.serialize(buf);
                    u.id.serialize(buf);
                    u.access_hash.serialize(buf);
                    u.first_name.serialize(buf);
                    u.last_name.serialize(buf);
                    u.phone.serialize(buf);
                }
            }
        }
    }

    pub(crate) const ID_CHAT_EMPTY: u32 = 0x9ba2d800;
    pub(crate) const ID_CHAT: u32 = 0xd91cdd54;
    pub(crate) const ID_CHANNEL: u32 = 0xa14dca52;

    #[derive(Clone, Debug, PartialEq)]
    pub enum Chat {
        Empty { id: i32 },
        Chat(types::Chat),
        Channel(types::Channel),
    }

    impl Chat {
        pub fn id(&self) -> i32 {
            match self {
                Self::Empty { id } => *id,
                Self::Chat(c) => c.id,
                Self::Channel(c) => c.id,
            }
        }
    }

    impl Deserializable for Chat {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                ID_CHAT_EMPTY => Ok(Self::Empty { id: i32::deserialize(buf)? }),
                ID_CHAT => Ok(Self::Chat(types::Chat {
                    id: i32::deserialize(buf)?,
                    title: String::deserialize(buf)?,
                })),
                ID_CHANNEL => Ok(Self::Channel(types::Channel {
                    id: i32::deserialize(buf)?,
                    access_hash: i64::deserialize(buf)?,
                    title: String::deserialize(buf)?,
                    pts: i32::deserialize(buf)?,
                })),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    // ── Message ────────────────────────────────────────────────────────────

    pub(crate) const ID_MESSAGE_EMPTY: u32 = 0x83e5de54;
    pub(crate) const ID_MESSAGE: u32 = 0x7f34a6a2;
    pub(crate) const ID_MESSAGE_SERVICE: u32 = 0xc2b25976;

    #[derive(Clone, Debug, PartialEq)]
    pub enum Message {
        Empty { id: i32 },
        Message(types::Message),
        Service { id: i32, from_id: i32, peer: Peer, date: i32 },
    }

    impl Message {
        pub fn id(&self) -> i32 {
            match self {
                Self::Empty { id } => *id,
                Self::Message(m) => m.id,
                Self::Service { id, .. } => *id,
            }
        }
    }

    impl Deserializable for Message {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                ID_MESSAGE_EMPTY => Ok(Self::Empty { id: i32::deserialize(buf)? }),
                ID_MESSAGE => Ok(Self::Message(types::Message {
                    id: i32::deserialize(buf)?,
                    from_id: i32::deserialize(buf)?,
                    peer: Peer::deserialize(buf)?,
                    date: i32::deserialize(buf)?,
                    text: String::deserialize(buf)?,
                })),
                ID_MESSAGE_SERVICE => Ok(Self::Service {
                    id: i32::deserialize(buf)?,
                    from_id: i32::deserialize(buf)?,
                    peer: Peer::deserialize(buf)?,
                    date: i32::deserialize(buf)?,
                }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    impl Serializable for Message {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            match self {
                Self::Empty { id } => {
                    ID_MESSAGE_EMPTY.serialize(buf);
                    id.serialize(buf);
                }
                Self::Message(m) => {
                    ID_MESSAGE.serialize(buf);
                    m.id.serialize(buf);
                    m.from_id.serialize(buf);
                    m.peer.serialize(buf);
                    m.date.serialize(buf);
                    m.text.serialize(buf);
                }
                Self::Service { id, from_id, peer, date } => {
                    ID_MESSAGE_SERVICE.serialize(buf);
                    id.serialize(buf);
                    from_id.serialize(buf);
                    peer.serialize(buf);
                    date.serialize(buf);
                }
            }
        }
    }

    // ── Dialog ─────────────────────────────────────────────────────────────

    pub(crate) const ID_DIALOG: u32 = 0xc1dd804a;
    pub(crate) const ID_DIALOG_CHANNEL: u32 = 0x5b8496b2;

    impl Deserializable for types::Dialog {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                ID_DIALOG => Ok(types::Dialog {
                    peer: Peer::deserialize(buf)?,
                    top_message: i32::deserialize(buf)?,
                    unread_count: i32::deserialize(buf)?,
                    pts: None,
                }),
                ID_DIALOG_CHANNEL => Ok(types::Dialog {
                    peer: Peer::deserialize(buf)?,
                    top_message: i32::deserialize(buf)?,
                    unread_count: i32::deserialize(buf)?,
                    pts: Some(i32::deserialize(buf)?),
                }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    // ── Input files / media ────────────────────────────────────────────────

    #[derive(Clone, Debug, PartialEq)]
    pub enum InputFile {
        /// Small files, uploaded with `upload.saveFilePart`.
        File { id: i64, parts: i32, name: String, md5_checksum: String },
        /// Files past the big-file threshold; every part declares the total.
        Big { id: i64, parts: i32, name: String },
    }

    impl Serializable for InputFile {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            match self {
                Self::File { id, parts, name, md5_checksum } => {
                    0xf52ff27fu32.serialize(buf);
                    id.serialize(buf);
                    parts.serialize(buf);
                    name.serialize(buf);
                    md5_checksum.serialize(buf);
                }
                Self::Big { id, parts, name } => {
                    0xfa4f0bb5u32.serialize(buf);
                    id.serialize(buf);
                    parts.serialize(buf);
                    name.serialize(buf);
                }
            }
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    pub enum DocumentAttribute {
        Filename { file_name: String },
        ImageSize { w: i32, h: i32 },
        Animated,
        Video { duration: i32, w: i32, h: i32 },
        Audio { duration: i32 },
        Sticker,
    }

    impl Serializable for DocumentAttribute {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            match self {
                Self::Filename { file_name } => {
                    crate::codes::DOCUMENT_ATTRIBUTE_FILENAME.serialize(buf);
                    file_name.serialize(buf);
                }
                Self::ImageSize { w, h } => {
                    crate::codes::DOCUMENT_ATTRIBUTE_IMAGE_SIZE.serialize(buf);
                    w.serialize(buf);
                    h.serialize(buf);
                }
                Self::Animated => crate::codes::DOCUMENT_ATTRIBUTE_ANIMATED.serialize(buf),
                Self::Video { duration, w, h } => {
                    crate::codes::DOCUMENT_ATTRIBUTE_VIDEO.serialize(buf);
                    duration.serialize(buf);
                    w.serialize(buf);
                    h.serialize(buf);
                }
                Self::Audio { duration } => {
                    crate::codes::DOCUMENT_ATTRIBUTE_AUDIO.serialize(buf);
                    duration.serialize(buf);
                }
                Self::Sticker => crate::codes::DOCUMENT_ATTRIBUTE_STICKER.serialize(buf),
            }
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    pub enum InputMedia {
        UploadedPhoto { file: InputFile, caption: String },
        UploadedDocument {
            file: InputFile,
            mime_type: String,
            attributes: Vec<DocumentAttribute>,
            caption: String,
        },
        UploadedThumbDocument {
            file: InputFile,
            thumb: InputFile,
            mime_type: String,
            attributes: Vec<DocumentAttribute>,
            caption: String,
        },
    }

    impl Serializable for InputMedia {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            match self {
                Self::UploadedPhoto { file, caption } => {
                    0xf7aff1c0u32.serialize(buf);
                    file.serialize(buf);
                    caption.serialize(buf);
                }
                Self::UploadedDocument { file, mime_type, attributes, caption } => {
                    0x1d89306du32.serialize(buf);
                    file.serialize(buf);
                    mime_type.serialize(buf);
                    attributes.serialize(buf);
                    caption.serialize(buf);
                }
                Self::UploadedThumbDocument { file, thumb, mime_type, attributes, caption } => {
                    0xad613491u32.serialize(buf);
                    file.serialize(buf);
                    thumb.serialize(buf);
                    mime_type.serialize(buf);
                    attributes.serialize(buf);
                    caption.serialize(buf);
                }
            }
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    pub enum InputChatPhoto {
        Empty,
        Uploaded { file: InputFile },
    }

    impl Serializable for InputChatPhoto {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            match self {
                Self::Empty => 0x1ca48f57u32.serialize(buf),
                Self::Uploaded { file } => {
                    0x927c55b4u32.serialize(buf);
                    file.serialize(buf);
                }
            }
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    pub enum InputFileLocation {
        /// Photo thumbs and legacy locations.
        Location { volume_id: i64, local_id: i32, secret: i64 },
        Document { id: i64, access_hash: i64 },
        Encrypted { id: i64, access_hash: i64 },
    }

    impl Serializable for InputFileLocation {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            match self {
                Self::Location { volume_id, local_id, secret } => {
                    0x14637196u32.serialize(buf);
                    volume_id.serialize(buf);
                    local_id.serialize(buf);
                    secret.serialize(buf);
                }
                Self::Document { id, access_hash } => {
                    0x4e45abe9u32.serialize(buf);
                    id.serialize(buf);
                    access_hash.serialize(buf);
                }
                Self::Encrypted { id, access_hash } => {
                    0xf5235d55u32.serialize(buf);
                    id.serialize(buf);
                    access_hash.serialize(buf);
                }
            }
        }
    }

    // ── Secret chats ───────────────────────────────────────────────────────

    #[derive(Clone, Debug, PartialEq)]
    pub struct InputEncryptedChat {
        pub chat_id: i32,
        pub access_hash: i64,
    }

    impl Serializable for InputEncryptedChat {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            0xf141b5e1u32.serialize(buf);
            self.chat_id.serialize(buf);
            self.access_hash.serialize(buf);
        }
    }

    #[derive(Clone, Debug, PartialEq)]
    pub enum InputEncryptedFile {
        Empty,
        Uploaded { id: i64, parts: i32, md5_checksum: String, key_fingerprint: i32 },
        BigUploaded { id: i64, parts: i32, key_fingerprint: i32 },
        Location { id: i64, access_hash: i64 },
    }

    impl Serializable for InputEncryptedFile {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            match self {
                Self::Empty => 0x1837c364u32.serialize(buf),
                Self::Uploaded { id, parts, md5_checksum, key_fingerprint } => {
                    0x64bd0306u32.serialize(buf);
                    id.serialize(buf);
                    parts.serialize(buf);
                    md5_checksum.serialize(buf);
                    key_fingerprint.serialize(buf);
                }
                Self::BigUploaded { id, parts, key_fingerprint } => {
                    0x2dc173c8u32.serialize(buf);
                    id.serialize(buf);
                    parts.serialize(buf);
                    key_fingerprint.serialize(buf);
                }
                Self::Location { id, access_hash } => {
                    0x5a17b5e5u32.serialize(buf);
                    id.serialize(buf);
                    access_hash.serialize(buf);
                }
            }
        }
    }

    pub(crate) const ID_ENCRYPTED_FILE_EMPTY: u32 = 0xc21f497e;
    pub(crate) const ID_ENCRYPTED_FILE: u32 = 0x4a70994c;

    #[derive(Clone, Debug, PartialEq)]
    pub enum EncryptedFile {
        Empty,
        File(types::EncryptedFile),
    }

    impl Deserializable for EncryptedFile {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                ID_ENCRYPTED_FILE_EMPTY => Ok(Self::Empty),
                ID_ENCRYPTED_FILE => Ok(Self::File(types::EncryptedFile {
                    id: i64::deserialize(buf)?,
                    access_hash: i64::deserialize(buf)?,
                    size: i32::deserialize(buf)?,
                    dc_id: i32::deserialize(buf)?,
                    key_fingerprint: i32::deserialize(buf)?,
                })),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    pub(crate) const ID_ENCRYPTED_CHAT_EMPTY: u32 = 0xab7ec0a0;
    pub(crate) const ID_ENCRYPTED_CHAT_WAITING: u32 = 0x3bf703dc;
    pub(crate) const ID_ENCRYPTED_CHAT_REQUESTED: u32 = 0xc878527e;
    pub(crate) const ID_ENCRYPTED_CHAT: u32 = 0xfa56ce36;
    pub(crate) const ID_ENCRYPTED_CHAT_DISCARDED: u32 = 0x13d6dd27;

    #[derive(Clone, Debug, PartialEq)]
    pub enum EncryptedChat {
        Empty { id: i32 },
        Waiting(types::EncryptedChatData),
        Requested(types::EncryptedChatData),
        Chat(types::EncryptedChatData),
        Discarded { id: i32 },
    }

    impl Deserializable for EncryptedChat {
        fn deserialize(buf: Buffer) -> Result<Self> {
            fn common(buf: Buffer) -> Result<types::EncryptedChatData> {
                Ok(types::EncryptedChatData {
                    id: i32::deserialize(buf)?,
                    access_hash: i64::deserialize(buf)?,
                    date: i32::deserialize(buf)?,
                    admin_id: i32::deserialize(buf)?,
                    participant_id: i32::deserialize(buf)?,
                    key_material: Vec::new(),
                    key_fingerprint: 0,
                })
            }
            match u32::deserialize(buf)? {
                ID_ENCRYPTED_CHAT_EMPTY => Ok(Self::Empty { id: i32::deserialize(buf)? }),
                ID_ENCRYPTED_CHAT_WAITING => Ok(Self::Waiting(common(buf)?)),
                ID_ENCRYPTED_CHAT_REQUESTED => {
                    let mut data = common(buf)?;
                    data.key_material = Vec::<u8>::deserialize(buf)?;
                    Ok(Self::Requested(data))
                }
                ID_ENCRYPTED_CHAT => {
                    let mut data = common(buf)?;
                    data.key_material = Vec::<u8>::deserialize(buf)?;
                    data.key_fingerprint = i64::deserialize(buf)?;
                    Ok(Self::Chat(data))
                }
                ID_ENCRYPTED_CHAT_DISCARDED => Ok(Self::Discarded { id: i32::deserialize(buf)? }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    pub(crate) const ID_ENCRYPTED_MESSAGE: u32 = 0xed18c118;
    pub(crate) const ID_ENCRYPTED_MESSAGE_SERVICE: u32 = 0x23734b06;

    /// Inbound secret-chat ciphertext, as carried by `updates.getDifference`.
    #[derive(Clone, Debug, PartialEq)]
    pub enum EncryptedMessage {
        Message {
            random_id: i64,
            chat_id: i32,
            date: i32,
            bytes: Vec<u8>,
            file: EncryptedFile,
        },
        Service {
            random_id: i64,
            chat_id: i32,
            date: i32,
            bytes: Vec<u8>,
        },
    }

    impl EncryptedMessage {
        pub fn chat_id(&self) -> i32 {
            match self {
                Self::Message { chat_id, .. } | Self::Service { chat_id, .. } => *chat_id,
            }
        }

        pub fn bytes(&self) -> &[u8] {
            match self {
                Self::Message { bytes, .. } | Self::Service { bytes, .. } => bytes,
            }
        }
    }

    impl Deserializable for EncryptedMessage {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                ID_ENCRYPTED_MESSAGE => Ok(Self::Message {
                    random_id: i64::deserialize(buf)?,
                    chat_id: i32::deserialize(buf)?,
                    date: i32::deserialize(buf)?,
                    bytes: Vec::<u8>::deserialize(buf)?,
                    file: EncryptedFile::deserialize(buf)?,
                }),
                ID_ENCRYPTED_MESSAGE_SERVICE => Ok(Self::Service {
                    random_id: i64::deserialize(buf)?,
                    chat_id: i32::deserialize(buf)?,
                    date: i32::deserialize(buf)?,
                    bytes: Vec::<u8>::deserialize(buf)?,
                }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    // ── Updates ────────────────────────────────────────────────────────────

    pub(crate) const ID_UPDATE_NEW_MESSAGE: u32 = 0x1f2b0afd;
    pub(crate) const ID_UPDATE_NEW_CHANNEL_MESSAGE: u32 = 0x62ba04d9;
    pub(crate) const ID_UPDATE_NEW_ENCRYPTED_MESSAGE: u32 = 0x12bcbd9a;
    pub(crate) const ID_UPDATE_ENCRYPTION: u32 = 0xb4a2e88d;
    pub(crate) const ID_UPDATE_READ_HISTORY_INBOX: u32 = 0x9961fd5c;
    pub(crate) const ID_UPDATE_DELETE_MESSAGES: u32 = 0xa20db0e5;
    pub(crate) const ID_UPDATE_CHANNEL_TOO_LONG: u32 = 0xeb0467fb;
    pub(crate) const ID_UPDATE_USER_DELETED: u32 = 0x9d49ba01;

    #[derive(Clone, Debug, PartialEq)]
    pub enum Update {
        NewMessage { message: Message, pts: i32, pts_count: i32 },
        NewChannelMessage { message: Message, pts: i32, pts_count: i32 },
        NewEncryptedMessage { message: EncryptedMessage, qts: i32 },
        Encryption { chat: EncryptedChat, date: i32 },
        ReadHistoryInbox { peer: Peer, max_id: i32, pts: i32, pts_count: i32 },
        DeleteMessages { messages: Vec<i32>, pts: i32, pts_count: i32 },
        ChannelTooLong { channel_id: i32 },
        UserDeleted { user_id: i32 },
    }

    impl Deserializable for Update {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                ID_UPDATE_NEW_MESSAGE => Ok(Self::NewMessage {
                    message: Message::deserialize(buf)?,
                    pts: i32::deserialize(buf)?,
                    pts_count: i32::deserialize(buf)?,
                }),
                ID_UPDATE_NEW_CHANNEL_MESSAGE => Ok(Self::NewChannelMessage {
                    message: Message::deserialize(buf)?,
                    pts: i32::deserialize(buf)?,
                    pts_count: i32::deserialize(buf)?,
                }),
                ID_UPDATE_NEW_ENCRYPTED_MESSAGE => Ok(Self::NewEncryptedMessage {
                    message: EncryptedMessage::deserialize(buf)?,
                    qts: i32::deserialize(buf)?,
                }),
                ID_UPDATE_ENCRYPTION => Ok(Self::Encryption {
                    chat: EncryptedChat::deserialize(buf)?,
                    date: i32::deserialize(buf)?,
                }),
                ID_UPDATE_READ_HISTORY_INBOX => Ok(Self::ReadHistoryInbox {
                    peer: Peer::deserialize(buf)?,
                    max_id: i32::deserialize(buf)?,
                    pts: i32::deserialize(buf)?,
                    pts_count: i32::deserialize(buf)?,
                }),
                ID_UPDATE_DELETE_MESSAGES => Ok(Self::DeleteMessages {
                    messages: Vec::<i32>::deserialize(buf)?,
                    pts: i32::deserialize(buf)?,
                    pts_count: i32::deserialize(buf)?,
                }),
                ID_UPDATE_CHANNEL_TOO_LONG => {
                    Ok(Self::ChannelTooLong { channel_id: i32::deserialize(buf)? })
                }
                ID_UPDATE_USER_DELETED => {
                    Ok(Self::UserDeleted { user_id: i32::deserialize(buf)? })
                }
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    pub(crate) const ID_UPDATES_TOO_LONG: u32 = 0xe317af7e;
    pub(crate) const ID_UPDATE_SHORT: u32 = 0x78d4dec1;
    pub(crate) const ID_UPDATES_COMBINED: u32 = 0x725b04c3;
    pub(crate) const ID_UPDATES: u32 = 0x74ae4240;

    /// The push container the server sends outside of RPC results.
    #[derive(Clone, Debug, PartialEq)]
    pub enum Updates {
        TooLong,
        Short { update: Update, date: i32 },
        Combined {
            updates: Vec<Update>,
            users: Vec<User>,
            chats: Vec<Chat>,
            date: i32,
            seq_start: i32,
            seq: i32,
        },
        Updates {
            updates: Vec<Update>,
            users: Vec<User>,
            chats: Vec<Chat>,
            date: i32,
            seq: i32,
        },
    }

    impl Deserializable for Updates {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                ID_UPDATES_TOO_LONG => Ok(Self::TooLong),
                ID_UPDATE_SHORT => Ok(Self::Short {
                    update: Update::deserialize(buf)?,
                    date: i32::deserialize(buf)?,
                }),
                ID_UPDATES_COMBINED => Ok(Self::Combined {
                    updates: Vec::<Update>::deserialize(buf)?,
                    users: Vec::<User>::deserialize(buf)?,
                    chats: Vec::<Chat>::deserialize(buf)?,
                    date: i32::deserialize(buf)?,
                    seq_start: i32::deserialize(buf)?,
                    seq: i32::deserialize(buf)?,
                }),
                ID_UPDATES => Ok(Self::Updates {
                    updates: Vec::<Update>::deserialize(buf)?,
                    users: Vec::<User>::deserialize(buf)?,
                    chats: Vec::<Chat>::deserialize(buf)?,
                    date: i32::deserialize(buf)?,
                    seq: i32::deserialize(buf)?,
                }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    // ── SendMessageAction ──────────────────────────────────────────────────

    #[derive(Clone, Debug, PartialEq)]
    pub enum SendMessageAction {
        Typing,
        CancelTyping,
        UploadDocument { progress: i32 },
    }

    impl Serializable for SendMessageAction {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            match self {
                Self::Typing => 0x16bf744eu32.serialize(buf),
                Self::CancelTyping => 0xfd5ec8f5u32.serialize(buf),
                Self::UploadDocument { progress } => {
                    0xaa0cd9e4u32.serialize(buf);
                    progress.serialize(buf);
                }
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// namespaced response enums
// ═════════════════════════════════════════════════════════════════════════════

pub mod auth {
    use super::*;

    pub enum SentCode {
        SentCode { phone_registered: bool, phone_code_hash: String },
    }

    impl Deserializable for SentCode {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                0x5e002502 => Ok(Self::SentCode {
                    phone_registered: bool::deserialize(buf)?,
                    phone_code_hash: String::deserialize(buf)?,
                }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    pub enum Authorization {
        Authorization { user: enums::User },
    }

    impl Deserializable for Authorization {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                0xff036af1 => Ok(Self::Authorization { user: enums::User::deserialize(buf)? }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    pub enum ExportedAuthorization {
        ExportedAuthorization { id: i32, bytes: Vec<u8> },
    }

    impl Deserializable for ExportedAuthorization {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                0xdf969c2d => Ok(Self::ExportedAuthorization {
                    id: i32::deserialize(buf)?,
                    bytes: Vec::<u8>::deserialize(buf)?,
                }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }
}

pub mod account {
    use super::*;

    pub enum Password {
        /// 2FA disabled; `new_salt` seeds a password change.
        NoPassword { new_salt: Vec<u8> },
        Password { current_salt: Vec<u8>, new_salt: Vec<u8>, hint: String },
    }

    impl Deserializable for Password {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                0x96dabc18 => Ok(Self::NoPassword { new_salt: Vec::<u8>::deserialize(buf)? }),
                0x7c18141c => Ok(Self::Password {
                    current_salt: Vec::<u8>::deserialize(buf)?,
                    new_salt: Vec::<u8>::deserialize(buf)?,
                    hint: String::deserialize(buf)?,
                }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }
}

pub mod help {
    use super::*;

    pub enum Config {
        Config(types::Config),
    }

    impl Deserializable for Config {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                0x4e32b894 => {
                    let date = i32::deserialize(buf)?;
                    let expires = i32::deserialize(buf)?;
                    let this_dc = i32::deserialize(buf)?;
                    let id = u32::deserialize(buf)?;
                    if id != 0x1cb5c415 {
                        return Err(Error::UnexpectedConstructor { id });
                    }
                    let count = i32::deserialize(buf)? as usize;
                    let mut dc_options = Vec::with_capacity(count);
                    for _ in 0..count {
                        let id = u32::deserialize(buf)?;
                        if id != 0x05d8c6cc {
                            return Err(Error::UnexpectedConstructor { id });
                        }
                        let flags = i32::deserialize(buf)?;
                        dc_options.push(types::DcOption {
                            id: i32::deserialize(buf)?,
                            ipv6: flags & 1 != 0,
                            media_only: flags & 2 != 0,
                            ip_address: String::deserialize(buf)?,
                            port: i32::deserialize(buf)?,
                        });
                    }
                    Ok(Self::Config(types::Config { date, expires, this_dc, dc_options }))
                }
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }
}

pub mod updates {
    use super::*;

    pub enum State {
        State(types::UpdatesState),
    }

    impl Deserializable for State {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                0xa56c2a3e => Ok(Self::State(types::UpdatesState {
                    pts: i32::deserialize(buf)?,
                    qts: i32::deserialize(buf)?,
                    date: i32::deserialize(buf)?,
                    seq: i32::deserialize(buf)?,
                    unread_count: i32::deserialize(buf)?,
                })),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    pub struct DifferenceData {
        pub new_messages: Vec<enums::Message>,
        pub new_encrypted_messages: Vec<enums::EncryptedMessage>,
        pub other_updates: Vec<enums::Update>,
        pub chats: Vec<enums::Chat>,
        pub users: Vec<enums::User>,
        pub state: types::UpdatesState,
    }

    pub enum Difference {
        Empty { date: i32, seq: i32 },
        Difference(DifferenceData),
        /// Same payload, but the `state` field is intermediate — issue
        /// another `getDifference` immediately.
        Slice(DifferenceData),
        TooLong { pts: i32 },
    }

    impl Deserializable for Difference {
        fn deserialize(buf: Buffer) -> Result<Self> {
            fn body(buf: Buffer) -> Result<DifferenceData> {
                Ok(DifferenceData {
                    new_messages: Vec::<enums::Message>::deserialize(buf)?,
                    new_encrypted_messages: Vec::<enums::EncryptedMessage>::deserialize(buf)?,
                    other_updates: Vec::<enums::Update>::deserialize(buf)?,
                    chats: Vec::<enums::Chat>::deserialize(buf)?,
                    users: Vec::<enums::User>::deserialize(buf)?,
                    state: match State::deserialize(buf)? {
                        State::State(s) => s,
                    },
                })
            }
            match u32::deserialize(buf)? {
                0x5d75a138 => Ok(Self::Empty {
                    date: i32::deserialize(buf)?,
                    seq: i32::deserialize(buf)?,
                }),
                0x00f49ca0 => Ok(Self::Difference(body(buf)?)),
                0xa8fb1981 => Ok(Self::Slice(body(buf)?)),
                0x4afe8f6d => Ok(Self::TooLong { pts: i32::deserialize(buf)? }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    pub struct ChannelDifferenceData {
        pub is_final: bool,
        pub pts: i32,
        pub new_messages: Vec<enums::Message>,
        pub other_updates: Vec<enums::Update>,
        pub chats: Vec<enums::Chat>,
        pub users: Vec<enums::User>,
    }

    pub enum ChannelDifference {
        Empty { is_final: bool, pts: i32 },
        TooLong { pts: i32 },
        Difference(ChannelDifferenceData),
    }

    impl Deserializable for ChannelDifference {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                0x3e11affb => {
                    let flags = i32::deserialize(buf)?;
                    Ok(Self::Empty { is_final: flags & 1 != 0, pts: i32::deserialize(buf)? })
                }
                0x410dee07 => {
                    let _flags = i32::deserialize(buf)?;
                    Ok(Self::TooLong { pts: i32::deserialize(buf)? })
                }
                0x2064674e => {
                    let flags = i32::deserialize(buf)?;
                    Ok(Self::Difference(ChannelDifferenceData {
                        is_final: flags & 1 != 0,
                        pts: i32::deserialize(buf)?,
                        new_messages: Vec::<enums::Message>::deserialize(buf)?,
                        other_updates: Vec::<enums::Update>::deserialize(buf)?,
                        chats: Vec::<enums::Chat>::deserialize(buf)?,
                        users: Vec::<enums::User>::deserialize(buf)?,
                    }))
                }
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }
}

pub mod messages {
    use super::*;

    pub enum Messages {
        Messages { messages: Vec<enums::Message>, chats: Vec<enums::Chat>, users: Vec<enums::User> },
        Slice {
            count: i32,
            messages: Vec<enums::Message>,
            chats: Vec<enums::Chat>,
            users: Vec<enums::User>,
        },
    }

    impl Messages {
        pub fn into_messages(self) -> Vec<enums::Message> {
            match self {
                Self::Messages { messages, .. } | Self::Slice { messages, .. } => messages,
            }
        }
    }

    impl Deserializable for Messages {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                0x8c718e87 => Ok(Self::Messages {
                    messages: Vec::<enums::Message>::deserialize(buf)?,
                    chats: Vec::<enums::Chat>::deserialize(buf)?,
                    users: Vec::<enums::User>::deserialize(buf)?,
                }),
                0x0b446ae3 => Ok(Self::Slice {
                    count: i32::deserialize(buf)?,
                    messages: Vec::<enums::Message>::deserialize(buf)?,
                    chats: Vec::<enums::Chat>::deserialize(buf)?,
                    users: Vec::<enums::User>::deserialize(buf)?,
                }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    pub enum Dialogs {
        Dialogs {
            dialogs: Vec<types::Dialog>,
            messages: Vec<enums::Message>,
            chats: Vec<enums::Chat>,
            users: Vec<enums::User>,
        },
        Slice {
            count: i32,
            dialogs: Vec<types::Dialog>,
            messages: Vec<enums::Message>,
            chats: Vec<enums::Chat>,
            users: Vec<enums::User>,
        },
    }

    impl Deserializable for Dialogs {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                0x15ba6c40 => Ok(Self::Dialogs {
                    dialogs: Vec::<types::Dialog>::deserialize(buf)?,
                    messages: Vec::<enums::Message>::deserialize(buf)?,
                    chats: Vec::<enums::Chat>::deserialize(buf)?,
                    users: Vec::<enums::User>::deserialize(buf)?,
                }),
                0x71e094f3 => Ok(Self::Slice {
                    count: i32::deserialize(buf)?,
                    dialogs: Vec::<types::Dialog>::deserialize(buf)?,
                    messages: Vec::<enums::Message>::deserialize(buf)?,
                    chats: Vec::<enums::Chat>::deserialize(buf)?,
                    users: Vec::<enums::User>::deserialize(buf)?,
                }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    pub struct AffectedHistory {
        pub pts: i32,
        pub pts_count: i32,
        pub offset: i32,
    }

    impl Deserializable for AffectedHistory {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                0xb45c69d1 => Ok(Self {
                    pts: i32::deserialize(buf)?,
                    pts_count: i32::deserialize(buf)?,
                    offset: i32::deserialize(buf)?,
                }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    pub enum SentEncryptedMessage {
        Message { date: i32 },
        File { date: i32, file: enums::EncryptedFile },
    }

    impl SentEncryptedMessage {
        pub fn date(&self) -> i32 {
            match self {
                Self::Message { date } | Self::File { date, .. } => *date,
            }
        }
    }

    impl Deserializable for SentEncryptedMessage {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                0x560f8935 => Ok(Self::Message { date: i32::deserialize(buf)? }),
                0x9493ff32 => Ok(Self::File {
                    date: i32::deserialize(buf)?,
                    file: enums::EncryptedFile::deserialize(buf)?,
                }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }

    pub enum DhConfig {
        NotModified { random: Vec<u8> },
        Config { g: i32, p: Vec<u8>, version: i32, random: Vec<u8> },
    }

    impl Deserializable for DhConfig {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                0xc0e24635 => Ok(Self::NotModified { random: Vec::<u8>::deserialize(buf)? }),
                0x2c221edd => Ok(Self::Config {
                    g: i32::deserialize(buf)?,
                    p: Vec::<u8>::deserialize(buf)?,
                    version: i32::deserialize(buf)?,
                    random: Vec::<u8>::deserialize(buf)?,
                }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }
}

pub mod photos {
    use super::*;

    pub enum Photo {
        Photo { users: Vec<enums::User> },
    }

    impl Deserializable for Photo {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                0x20212ca8 => Ok(Self::Photo { users: Vec::<enums::User>::deserialize(buf)? }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }
}

pub mod upload {
    use super::*;

    pub enum File {
        File { mtime: i32, bytes: Vec<u8> },
    }

    impl Deserializable for File {
        fn deserialize(buf: Buffer) -> Result<Self> {
            match u32::deserialize(buf)? {
                0x096a18d5 => Ok(Self::File {
                    mtime: i32::deserialize(buf)?,
                    bytes: Vec::<u8>::deserialize(buf)?,
                }),
                id => Err(Error::UnexpectedConstructor { id }),
            }
        }
    }
}

// ═════════════════════════════════════════════════════════════════════════════
// functions
// ═════════════════════════════════════════════════════════════════════════════

pub mod functions {
    use super::*;

    /// `invokeWithLayer#da9b0d0d layer:int query:!X = X`
    pub struct InvokeWithLayer<Q> {
        pub layer: i32,
        pub query: Q,
    }

    impl<Q: Serializable> Serializable for InvokeWithLayer<Q> {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            0xda9b0d0du32.serialize(buf);
            self.layer.serialize(buf);
            self.query.serialize(buf);
        }
    }

    impl<Q: RemoteCall> RemoteCall for InvokeWithLayer<Q> {
        type Return = Q::Return;
    }

    /// `initConnection#69796de9 api_id:int device_model:string
    /// system_version:string app_version:string lang_code:string query:!X = X`
    pub struct InitConnection<Q> {
        pub api_id: i32,
        pub device_model: String,
        pub system_version: String,
        pub app_version: String,
        pub lang_code: String,
        pub query: Q,
    }

    impl<Q: Serializable> Serializable for InitConnection<Q> {
        fn serialize(&self, buf: &mut impl Extend<u8>) {
            0x69796de9u32.serialize(buf);
            self.api_id.serialize(buf);
            self.device_model.serialize(buf);
            self.system_version.serialize(buf);
            self.app_version.serialize(buf);
            self.lang_code.serialize(buf);
            self.query.serialize(buf);
        }
    }

    impl<Q: RemoteCall> RemoteCall for InitConnection<Q> {
        type Return = Q::Return;
    }

    pub mod help {
        use super::super::*;

        pub struct GetConfig;

        impl Identifiable for GetConfig {
            const CONSTRUCTOR_ID: u32 = 0xc4f9186b;
        }

        impl Serializable for GetConfig {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                Self::CONSTRUCTOR_ID.serialize(buf);
            }
        }

        impl RemoteCall for GetConfig {
            type Return = crate::schema::help::Config;
        }
    }

    pub mod auth {
        use super::super::*;

        pub struct SendCode {
            pub phone_number: String,
            pub sms_type: i32,
            pub api_id: i32,
            pub api_hash: String,
            pub lang_code: String,
        }

        impl Serializable for SendCode {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0x768d5f4du32.serialize(buf);
                self.phone_number.serialize(buf);
                self.sms_type.serialize(buf);
                self.api_id.serialize(buf);
                self.api_hash.serialize(buf);
                self.lang_code.serialize(buf);
            }
        }

        impl RemoteCall for SendCode {
            type Return = crate::schema::auth::SentCode;
        }

        pub struct SignIn {
            pub phone_number: String,
            pub phone_code_hash: String,
            pub phone_code: String,
        }

        impl Serializable for SignIn {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xbcd51581u32.serialize(buf);
                self.phone_number.serialize(buf);
                self.phone_code_hash.serialize(buf);
                self.phone_code.serialize(buf);
            }
        }

        impl RemoteCall for SignIn {
            type Return = crate::schema::auth::Authorization;
        }

        pub struct LogOut;

        impl Serializable for LogOut {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0x5717da40u32.serialize(buf);
            }
        }

        impl RemoteCall for LogOut {
            type Return = bool;
        }

        pub struct ExportAuthorization {
            pub dc_id: i32,
        }

        impl Serializable for ExportAuthorization {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xe5bfffcdu32.serialize(buf);
                self.dc_id.serialize(buf);
            }
        }

        impl RemoteCall for ExportAuthorization {
            type Return = crate::schema::auth::ExportedAuthorization;
        }

        pub struct ImportAuthorization {
            pub id: i32,
            pub bytes: Vec<u8>,
        }

        impl Serializable for ImportAuthorization {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xe3ef9613u32.serialize(buf);
                self.id.serialize(buf);
                self.bytes.serialize(buf);
            }
        }

        impl RemoteCall for ImportAuthorization {
            type Return = crate::schema::auth::Authorization;
        }

        pub struct BindTempAuthKey {
            pub perm_auth_key_id: i64,
            pub nonce: i64,
            pub expires_at: i32,
            pub encrypted_message: Vec<u8>,
        }

        impl Serializable for BindTempAuthKey {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xcdd42a05u32.serialize(buf);
                self.perm_auth_key_id.serialize(buf);
                self.nonce.serialize(buf);
                self.expires_at.serialize(buf);
                self.encrypted_message.serialize(buf);
            }
        }

        impl RemoteCall for BindTempAuthKey {
            type Return = bool;
        }

        pub struct CheckPassword {
            pub password_hash: Vec<u8>,
        }

        impl Serializable for CheckPassword {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0x0a63011eu32.serialize(buf);
                self.password_hash.serialize(buf);
            }
        }

        impl RemoteCall for CheckPassword {
            type Return = crate::schema::auth::Authorization;
        }
    }

    pub mod account {
        use super::super::*;

        pub struct GetPassword;

        impl Serializable for GetPassword {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0x548a30f5u32.serialize(buf);
            }
        }

        impl RemoteCall for GetPassword {
            type Return = crate::schema::account::Password;
        }

        /// `account.updateProfile first_name:string last_name:string = User`
        pub struct UpdateProfile {
            pub first_name: String,
            pub last_name: String,
        }

        impl Serializable for UpdateProfile {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xf0888d68u32.serialize(buf);
                self.first_name.serialize(buf);
                self.last_name.serialize(buf);
            }
        }

        impl RemoteCall for UpdateProfile {
            type Return = enums::User;
        }
    }

    pub mod updates {
        use super::super::*;

        pub struct GetState;

        impl Serializable for GetState {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xedd4882au32.serialize(buf);
            }
        }

        impl RemoteCall for GetState {
            type Return = crate::schema::updates::State;
        }

        pub struct GetDifference {
            pub pts: i32,
            pub date: i32,
            pub qts: i32,
        }

        impl Serializable for GetDifference {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0x0a041495u32.serialize(buf);
                self.pts.serialize(buf);
                self.date.serialize(buf);
                self.qts.serialize(buf);
            }
        }

        impl RemoteCall for GetDifference {
            type Return = crate::schema::updates::Difference;
        }

        pub struct GetChannelDifference {
            pub channel: enums::InputChannel,
            pub pts: i32,
            pub limit: i32,
        }

        impl Serializable for GetChannelDifference {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xbb32d7c0u32.serialize(buf);
                self.channel.serialize(buf);
                0x94d42ee7u32.serialize(buf); // channelMessagesFilterEmpty
                self.pts.serialize(buf);
                self.limit.serialize(buf);
            }
        }

        impl RemoteCall for GetChannelDifference {
            type Return = crate::schema::updates::ChannelDifference;
        }
    }

    pub mod messages {
        use super::super::*;

        /// `messages.sendMessage flags:# peer:InputPeer
        /// reply_to_msg_id:flags.0?int message:string random_id:long = Updates`
        pub struct SendMessage {
            pub peer: enums::InputPeer,
            pub reply_to_msg_id: Option<i32>,
            pub message: String,
            pub random_id: i64,
        }

        impl Serializable for SendMessage {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xfa88427au32.serialize(buf);
                let flags: i32 = if self.reply_to_msg_id.is_some() { 1 } else { 0 };
                flags.serialize(buf);
                self.peer.serialize(buf);
                self.reply_to_msg_id.serialize(buf);
                self.message.serialize(buf);
                self.random_id.serialize(buf);
            }
        }

        impl RemoteCall for SendMessage {
            type Return = enums::Updates;
        }

        pub struct SendMedia {
            pub peer: enums::InputPeer,
            pub reply_to_msg_id: Option<i32>,
            pub media: enums::InputMedia,
            pub random_id: i64,
        }

        impl Serializable for SendMedia {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xc8f16791u32.serialize(buf);
                let flags: i32 = if self.reply_to_msg_id.is_some() { 1 } else { 0 };
                flags.serialize(buf);
                self.peer.serialize(buf);
                self.reply_to_msg_id.serialize(buf);
                self.media.serialize(buf);
                self.random_id.serialize(buf);
            }
        }

        impl RemoteCall for SendMedia {
            type Return = enums::Updates;
        }

        pub struct GetDialogs {
            pub offset: i32,
            pub limit: i32,
        }

        impl Serializable for GetDialogs {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0x6b47f94du32.serialize(buf);
                self.offset.serialize(buf);
                self.limit.serialize(buf);
            }
        }

        impl RemoteCall for GetDialogs {
            type Return = crate::schema::messages::Dialogs;
        }

        pub struct GetHistory {
            pub peer: enums::InputPeer,
            pub offset: i32,
            pub max_id: i32,
            pub limit: i32,
        }

        impl Serializable for GetHistory {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0x8a8ec2dau32.serialize(buf);
                self.peer.serialize(buf);
                self.offset.serialize(buf);
                self.max_id.serialize(buf);
                self.limit.serialize(buf);
            }
        }

        impl RemoteCall for GetHistory {
            type Return = crate::schema::messages::Messages;
        }

        pub struct ReadHistory {
            pub peer: enums::InputPeer,
            pub max_id: i32,
        }

        impl Serializable for ReadHistory {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0x0e306d3au32.serialize(buf);
                self.peer.serialize(buf);
                self.max_id.serialize(buf);
            }
        }

        impl RemoteCall for ReadHistory {
            type Return = crate::schema::messages::AffectedHistory;
        }

        pub struct SetTyping {
            pub peer: enums::InputPeer,
            pub action: enums::SendMessageAction,
        }

        impl Serializable for SetTyping {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xa3825e50u32.serialize(buf);
                self.peer.serialize(buf);
                self.action.serialize(buf);
            }
        }

        impl RemoteCall for SetTyping {
            type Return = bool;
        }

        pub struct EditChatTitle {
            pub chat_id: i32,
            pub title: String,
        }

        impl Serializable for EditChatTitle {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xdc452855u32.serialize(buf);
                self.chat_id.serialize(buf);
                self.title.serialize(buf);
            }
        }

        impl RemoteCall for EditChatTitle {
            type Return = enums::Updates;
        }

        pub struct EditChatPhoto {
            pub chat_id: i32,
            pub photo: enums::InputChatPhoto,
        }

        impl Serializable for EditChatPhoto {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xca4c79d8u32.serialize(buf);
                self.chat_id.serialize(buf);
                self.photo.serialize(buf);
            }
        }

        impl RemoteCall for EditChatPhoto {
            type Return = enums::Updates;
        }

        pub struct GetDhConfig {
            pub version: i32,
            pub random_length: i32,
        }

        impl Serializable for GetDhConfig {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0x26cf8950u32.serialize(buf);
                self.version.serialize(buf);
                self.random_length.serialize(buf);
            }
        }

        impl RemoteCall for GetDhConfig {
            type Return = crate::schema::messages::DhConfig;
        }

        pub struct RequestEncryption {
            pub user_id: enums::InputUser,
            pub random_id: i32,
            pub g_a: Vec<u8>,
        }

        impl Serializable for RequestEncryption {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xf64daf43u32.serialize(buf);
                self.user_id.serialize(buf);
                self.random_id.serialize(buf);
                self.g_a.serialize(buf);
            }
        }

        impl RemoteCall for RequestEncryption {
            type Return = enums::EncryptedChat;
        }

        pub struct AcceptEncryption {
            pub peer: enums::InputEncryptedChat,
            pub g_b: Vec<u8>,
            pub key_fingerprint: i64,
        }

        impl Serializable for AcceptEncryption {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0x3dbc0415u32.serialize(buf);
                self.peer.serialize(buf);
                self.g_b.serialize(buf);
                self.key_fingerprint.serialize(buf);
            }
        }

        impl RemoteCall for AcceptEncryption {
            type Return = enums::EncryptedChat;
        }

        pub struct DiscardEncryption {
            pub chat_id: i32,
        }

        impl Serializable for DiscardEncryption {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xedd923c5u32.serialize(buf);
                self.chat_id.serialize(buf);
            }
        }

        impl RemoteCall for DiscardEncryption {
            type Return = bool;
        }

        /// Raw composed variant of `messages.sendEncrypted*` — the body is
        /// produced by the secret-chat engine's serializer, so the whole
        /// query is already TL on arrival.
        pub struct SendEncrypted {
            pub peer: enums::InputEncryptedChat,
            pub random_id: i64,
            pub data: Vec<u8>,
        }

        impl Serializable for SendEncrypted {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xa9776773u32.serialize(buf);
                self.peer.serialize(buf);
                self.random_id.serialize(buf);
                self.data.serialize(buf);
            }
        }

        impl RemoteCall for SendEncrypted {
            type Return = crate::schema::messages::SentEncryptedMessage;
        }

        pub struct SendEncryptedFile {
            pub peer: enums::InputEncryptedChat,
            pub random_id: i64,
            pub data: Vec<u8>,
            pub file: enums::InputEncryptedFile,
        }

        impl Serializable for SendEncryptedFile {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0x9a901b66u32.serialize(buf);
                self.peer.serialize(buf);
                self.random_id.serialize(buf);
                self.data.serialize(buf);
                self.file.serialize(buf);
            }
        }

        impl RemoteCall for SendEncryptedFile {
            type Return = crate::schema::messages::SentEncryptedMessage;
        }

        pub struct SendEncryptedService {
            pub peer: enums::InputEncryptedChat,
            pub random_id: i64,
            pub data: Vec<u8>,
        }

        impl Serializable for SendEncryptedService {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0x32d439a4u32.serialize(buf);
                self.peer.serialize(buf);
                self.random_id.serialize(buf);
                self.data.serialize(buf);
            }
        }

        impl RemoteCall for SendEncryptedService {
            type Return = crate::schema::messages::SentEncryptedMessage;
        }
    }

    pub mod upload {
        use super::super::*;

        pub struct SaveFilePart {
            pub file_id: i64,
            pub file_part: i32,
            pub bytes: Vec<u8>,
        }

        impl Serializable for SaveFilePart {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xb304a621u32.serialize(buf);
                self.file_id.serialize(buf);
                self.file_part.serialize(buf);
                self.bytes.serialize(buf);
            }
        }

        impl RemoteCall for SaveFilePart {
            type Return = bool;
        }

        pub struct SaveBigFilePart {
            pub file_id: i64,
            pub file_part: i32,
            pub file_total_parts: i32,
            pub bytes: Vec<u8>,
        }

        impl Serializable for SaveBigFilePart {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xde7b673du32.serialize(buf);
                self.file_id.serialize(buf);
                self.file_part.serialize(buf);
                self.file_total_parts.serialize(buf);
                self.bytes.serialize(buf);
            }
        }

        impl RemoteCall for SaveBigFilePart {
            type Return = bool;
        }

        pub struct GetFile {
            pub location: enums::InputFileLocation,
            pub offset: i32,
            pub limit: i32,
        }

        impl Serializable for GetFile {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xe3a6cfb5u32.serialize(buf);
                self.location.serialize(buf);
                self.offset.serialize(buf);
                self.limit.serialize(buf);
            }
        }

        impl RemoteCall for GetFile {
            type Return = crate::schema::upload::File;
        }
    }

    pub mod photos {
        use super::super::*;

        pub struct UploadProfilePhoto {
            pub file: enums::InputFile,
            pub caption: String,
        }

        impl Serializable for UploadProfilePhoto {
            fn serialize(&self, buf: &mut impl Extend<u8>) {
                0xd50f9c88u32.serialize(buf);
                self.file.serialize(buf);
                self.caption.serialize(buf);
            }
        }

        impl RemoteCall for UploadProfilePhoto {
            type Return = crate::schema::photos::Photo;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Deserializable, Serializable};

    #[test]
    fn message_round_trip() {
        let msg = enums::Message::Message(types::Message {
            id: 10,
            from_id: 7,
            peer: enums::Peer::User { user_id: 7 },
            date: 1000,
            text: "hello".into(),
        });
        let wire = msg.to_bytes();
        assert_eq!(enums::Message::from_bytes(&wire).unwrap(), msg);
    }

    #[test]
    fn send_message_flags_follow_reply() {
        let plain = functions::messages::SendMessage {
            peer: enums::InputPeer::SelfPeer,
            reply_to_msg_id: None,
            message: "hi".into(),
            random_id: 5,
        }
        .to_bytes();
        let with_reply = functions::messages::SendMessage {
            peer: enums::InputPeer::SelfPeer,
            reply_to_msg_id: Some(42),
            message: "hi".into(),
            random_id: 5,
        }
        .to_bytes();

        assert_eq!(&plain[4..8], &0i32.to_le_bytes());
        assert_eq!(&with_reply[4..8], &1i32.to_le_bytes());
        assert_eq!(with_reply.len(), plain.len() + 4);
    }

    #[test]
    fn update_profile_writes_both_names_fully() {
        // first_name must be framed with its own length, not last_name's
        let req = functions::account::UpdateProfile {
            first_name: "Ada".into(),
            last_name: "L".into(),
        };
        let wire = req.to_bytes();
        let mut cur = crate::Cursor::from_slice(&wire[4..]);
        assert_eq!(String::deserialize(&mut cur).unwrap(), "Ada");
        assert_eq!(String::deserialize(&mut cur).unwrap(), "L");
        assert_eq!(cur.remaining(), 0);
    }

    #[test]
    fn updates_container_round_trip() {
        let mut wire = Vec::new();
        enums::ID_UPDATE_SHORT.serialize(&mut wire);
        enums::ID_UPDATE_CHANNEL_TOO_LONG.serialize(&mut wire);
        77i32.serialize(&mut wire); // channel_id
        123i32.serialize(&mut wire); // date
        match enums::Updates::from_bytes(&wire).unwrap() {
            enums::Updates::Short { update, date } => {
                assert_eq!(update, enums::Update::ChannelTooLong { channel_id: 77 });
                assert_eq!(date, 123);
            }
            _ => panic!("expected updateShort"),
        }
    }
}
