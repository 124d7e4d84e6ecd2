//! Wire-format checks across the public codec surface.

use courier_tl::mtproto::{MsgsAck, Ping, ReqPqMulti};
use courier_tl::{enums, functions, Cursor, Deserializable, RawVec, Serializable, Serializer};

#[test]
fn functions_lead_with_their_constructor() {
    let wire = Ping { ping_id: -1 }.to_bytes();
    assert_eq!(&wire[..4], &0x7abe77ecu32.to_le_bytes());
    assert_eq!(&wire[4..], &(-1i64).to_le_bytes());

    let wire = ReqPqMulti { nonce: [0xab; 16] }.to_bytes();
    assert_eq!(&wire[..4], &0xbe7e8ef1u32.to_le_bytes());
}

#[test]
fn msgs_ack_carries_a_boxed_vector() {
    let wire = MsgsAck { msg_ids: vec![1, 2, 3] }.to_bytes();
    let mut cur = Cursor::from_slice(&wire);
    assert_eq!(u32::deserialize(&mut cur).unwrap(), 0x62d6b459);
    assert_eq!(Vec::<i64>::deserialize(&mut cur).unwrap(), vec![1, 2, 3]);
    assert_eq!(cur.remaining(), 0);
}

#[test]
fn raw_vec_has_no_constructor_header() {
    let boxed = vec![7i32].to_bytes();
    let bare = RawVec(vec![7i32]).to_bytes();
    assert_eq!(boxed.len(), bare.len() + 4);
    assert_eq!(&boxed[8..], &bare[4..]);
}

#[test]
fn serializer_output_matches_trait_serialization() {
    // the composed path and the typed path must agree byte for byte
    let mut s = Serializer::new();
    s.out_u32(0x62d6b459);
    s.out_u32(0x1cb5c415);
    s.out_i32(2);
    s.out_i64(10);
    s.out_i64(20);

    let typed = MsgsAck { msg_ids: vec![10, 20] }.to_bytes();
    assert_eq!(s.as_bytes(), typed.as_slice());
}

#[test]
fn send_encrypted_round_trips_its_envelope_bytes() {
    let payload = vec![0x5au8; 48];
    let wire = functions::messages::SendEncrypted {
        peer: enums::InputEncryptedChat { chat_id: 9, access_hash: -4 },
        random_id: 77,
        data: payload.clone(),
    }
    .to_bytes();

    let mut cur = Cursor::from_slice(&wire[4..]); // skip constructor
    assert_eq!(u32::deserialize(&mut cur).unwrap(), 0xf141b5e1); // inputEncryptedChat
    assert_eq!(i32::deserialize(&mut cur).unwrap(), 9);
    assert_eq!(i64::deserialize(&mut cur).unwrap(), -4);
    assert_eq!(i64::deserialize(&mut cur).unwrap(), 77);
    assert_eq!(Vec::<u8>::deserialize(&mut cur).unwrap(), payload);
    assert_eq!(cur.remaining(), 0);
}

#[test]
fn difference_empty_decodes() {
    let mut wire = Vec::new();
    0x5d75a138u32.serialize(&mut wire);
    1000i32.serialize(&mut wire);
    5i32.serialize(&mut wire);
    match courier_tl::schema::updates::Difference::from_bytes(&wire).unwrap() {
        courier_tl::schema::updates::Difference::Empty { date, seq } => {
            assert_eq!((date, seq), (1000, 5));
        }
        _ => panic!("expected differenceEmpty"),
    }
}
