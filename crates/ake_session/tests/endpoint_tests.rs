use std::collections::VecDeque;

use ake_proto::{ConfirmPayload, ProtocolMessage, Role, SessionId};
use ake_session::{
    Endpoint, Handshake, HandshakeSettings, HandshakeState, IdentityAccess, IvMode, LocalIdentity,
    MemoryDirectory, Opened, Outbound, SessionError, SessionRef, SessionSettings,
};

type Party = Endpoint<LocalIdentity, MemoryDirectory>;

fn parties(settings: SessionSettings) -> (Party, Party) {
    let alice = LocalIdentity::generate("alice");
    let bob = LocalIdentity::generate("bob");
    let dir = MemoryDirectory::new()
        .with("alice", alice.public_key())
        .with("bob", bob.public_key());
    (
        Endpoint::new("alice", alice, dir.clone(), settings.clone()).unwrap(),
        Endpoint::new("bob", bob, dir, settings).unwrap(),
    )
}

/// Deliver until quiet. Every message is delivered twice and the queue is
/// drained from alternating ends, so delivery is neither ordered nor
/// exactly-once.
fn pump(alice: &mut Party, bob: &mut Party, first: Outbound) -> usize {
    let mut queue = VecDeque::from([first.clone(), first]);
    let mut discarded = 0;
    let mut from_back = false;
    while let Some(out) = if from_back { queue.pop_back() } else { queue.pop_front() } {
        from_back = !from_back;
        let target = if out.to == "alice" { &mut *alice } else { &mut *bob };
        let progress = target.handle(out.message).unwrap();
        discarded += progress.discarded.len();
        for reply in progress.outbound {
            queue.push_back(reply.clone());
            queue.push_back(reply);
        }
    }
    discarded
}

/// Alice's and Bob's names for the same session.
fn refs(sid: SessionId) -> (SessionRef, SessionRef) {
    (SessionRef::new("bob", sid), SessionRef::new("alice", sid))
}

fn established(settings: SessionSettings) -> (Party, Party, SessionRef, SessionRef) {
    let (mut alice, mut bob) = parties(settings);
    let init = alice.initiate("bob").unwrap();
    let (at_alice, at_bob) = refs(init.message.session_id());
    pump(&mut alice, &mut bob, init);
    (alice, bob, at_alice, at_bob)
}

fn plaintext(opened: Opened) -> Vec<u8> {
    match opened {
        Opened::Message(d) => d.plaintext.to_vec(),
        Opened::Deferred => panic!("message was deferred"),
    }
}

#[test]
fn handshake_survives_duplicated_unordered_delivery() {
    let (mut alice, mut bob) = parties(SessionSettings::default());
    let init = alice.initiate("bob").unwrap();
    let (at_alice, at_bob) = refs(init.message.session_id());

    let discarded = pump(&mut alice, &mut bob, init);
    // One duplicate of each of the four handshake messages.
    assert_eq!(discarded, 4);
    assert_eq!(alice.state(&at_alice), Some(HandshakeState::Confirmed));
    assert_eq!(bob.state(&at_bob), Some(HandshakeState::Confirmed));
    assert_eq!(
        alice.session(&at_alice).unwrap().session_key(),
        bob.session(&at_bob).unwrap().session_key()
    );
}

#[test]
fn chat_in_both_directions() {
    let (mut alice, mut bob, at_alice, at_bob) = established(SessionSettings::default());

    let env = alice.seal(&at_alice, b"hi").unwrap();
    assert_eq!(env.msg_seq, 1);
    let Opened::Message(delivered) = bob.open(env).unwrap() else {
        panic!("message was deferred");
    };
    assert_eq!(&delivered.plaintext[..], b"hi");
    assert_eq!(delivered.session(), at_bob);

    let env = bob.seal(&at_bob, b"hello alice").unwrap();
    assert_eq!(env.msg_seq, 1);
    assert_eq!(plaintext(alice.open(env).unwrap()), b"hello alice");

    assert_eq!(alice.seal(&at_alice, b"again").unwrap().msg_seq, 2);
}

#[test]
fn replayed_envelope_is_rejected_after_authentication() {
    let (mut alice, mut bob, at_alice, _) = established(SessionSettings::default());

    let env = alice.seal(&at_alice, b"once").unwrap();
    bob.open(env.clone()).unwrap();
    assert!(matches!(
        bob.open(env),
        Err(SessionError::Replay { msg_seq: 1, high_water: 1, .. })
    ));
}

#[test]
fn reordered_envelopes_below_the_high_water_mark_are_rejected() {
    let (mut alice, mut bob, at_alice, _) = established(SessionSettings::default());

    let first = alice.seal(&at_alice, b"1").unwrap();
    let second = alice.seal(&at_alice, b"2").unwrap();
    assert_eq!(plaintext(bob.open(second).unwrap()), b"2");
    assert!(matches!(bob.open(first), Err(SessionError::Replay { .. })));
}

#[test]
fn replay_guard_can_be_disabled() {
    let settings = SessionSettings { replay_protection: false, ..SessionSettings::default() };
    let (mut alice, mut bob, at_alice, _) = established(settings);

    let env = alice.seal(&at_alice, b"dup").unwrap();
    bob.open(env.clone()).unwrap();
    assert_eq!(plaintext(bob.open(env).unwrap()), b"dup");
}

#[test]
fn forged_envelope_does_not_move_the_mark() {
    let (mut alice, mut bob, at_alice, at_bob) = established(SessionSettings::default());

    let mut forged = alice.seal(&at_alice, b"real").unwrap();
    let genuine = forged.clone();
    forged.msg_seq = 100;
    assert!(matches!(bob.open(forged), Err(SessionError::Decryption)));
    assert_eq!(plaintext(bob.open(genuine).unwrap()), b"real");
    // Decryption faults keep the session.
    assert_eq!(bob.state(&at_bob), Some(HandshakeState::Confirmed));
}

#[test]
fn counter_iv_mode_round_trips_through_endpoints() {
    let settings = SessionSettings { iv_mode: IvMode::Counter, ..SessionSettings::default() };
    let (mut alice, mut bob, at_alice, _) = established(settings);

    let a = alice.seal(&at_alice, b"x").unwrap();
    let b = alice.seal(&at_alice, b"x").unwrap();
    assert_ne!(a.iv, b.iv);
    assert_eq!(plaintext(bob.open(a).unwrap()), b"x");
    assert_eq!(plaintext(bob.open(b).unwrap()), b"x");
}

#[test]
fn tampered_key_init_creates_no_session() {
    let (mut alice, mut bob) = parties(SessionSettings::default());
    let mut init = alice.initiate("bob").unwrap();
    if let ProtocolMessage::KeyInit { body, .. } = &mut init.message {
        body.ephemeral_public[0] ^= 0x01;
    }
    assert!(matches!(bob.handle(init.message), Err(SessionError::Authentication)));
    assert_eq!(bob.session_refs().count(), 0);
}

#[test]
fn key_init_from_unknown_initiator_is_discarded() {
    let alice = LocalIdentity::generate("alice");
    let bob = LocalIdentity::generate("bob");
    let alice_dir = MemoryDirectory::new().with("bob", bob.public_key());
    let bob_dir = MemoryDirectory::new().with("bob", bob.public_key());
    let mut alice = Endpoint::new("alice", alice, alice_dir, SessionSettings::default()).unwrap();
    let mut bob = Endpoint::new("bob", bob, bob_dir, SessionSettings::default()).unwrap();

    let init = alice.initiate("bob").unwrap();
    let progress = bob.handle(init.message).unwrap();
    assert!(progress.outbound.is_empty());
    assert!(progress.key_ready.is_none());
    assert!(matches!(
        progress.discarded.as_slice(),
        [SessionError::UnknownPeer(name)] if name == "alice"
    ));
    assert_eq!(bob.session_refs().count(), 0);
}

#[test]
fn forged_key_resp_drops_the_initiator_session() {
    let (mut alice, mut bob) = parties(SessionSettings::default());
    let init = alice.initiate("bob").unwrap();
    let at_alice = init.session();
    let mut resp = bob.handle(init.message).unwrap().outbound.remove(0);
    if let ProtocolMessage::KeyResp { body, .. } = &mut resp.message {
        body.nonce[0] ^= 0x01;
    }

    assert!(matches!(alice.handle(resp.message), Err(SessionError::Authentication)));
    assert!(alice.session(&at_alice).is_none());
}

#[test]
fn aborted_session_is_not_reopened_by_a_repeated_key_init() {
    let (mut alice, mut bob) = parties(SessionSettings::default());
    let init = alice.initiate("bob").unwrap();
    let (_, at_bob) = refs(init.message.session_id());
    bob.handle(init.message.clone()).unwrap();

    let forged = ConfirmPayload {
        session_id: at_bob.session_id,
        role: Role::Initiator,
        iv: [0; 12],
        ciphertext: vec![0; 48],
    };
    assert!(matches!(
        bob.handle(ProtocolMessage::KeyConfirmA(forged)),
        Err(SessionError::KeyConfirmation)
    ));
    assert_eq!(bob.state(&at_bob), None);

    // A late copy of the original KEY_INIT.
    let progress = bob.handle(init.message).unwrap();
    assert!(progress.outbound.is_empty());
    assert!(progress.key_ready.is_none());
    assert!(matches!(progress.discarded.as_slice(), [SessionError::ProtocolState(_)]));
    assert_eq!(bob.state(&at_bob), None);
}

#[test]
fn forgotten_session_is_not_reopened_by_a_repeated_key_init() {
    let (mut alice, mut bob) = parties(SessionSettings::default());
    let init = alice.initiate("bob").unwrap();
    let (_, at_bob) = refs(init.message.session_id());
    let copy = init.message.clone();
    pump(&mut alice, &mut bob, init);
    assert!(bob.forget(&at_bob).is_some());

    let progress = bob.handle(copy).unwrap();
    assert!(progress.outbound.is_empty());
    assert_eq!(progress.discarded.len(), 1);
    assert_eq!(bob.session_refs().count(), 0);
}

#[test]
fn borrowed_session_id_does_not_block_the_genuine_initiator() {
    let alice_id = LocalIdentity::generate("alice");
    let bob_id = LocalIdentity::generate("bob");
    let mallory_id = LocalIdentity::generate("mallory");
    let dir = MemoryDirectory::new()
        .with("alice", alice_id.public_key())
        .with("bob", bob_id.public_key())
        .with("mallory", mallory_id.public_key());
    let mut alice = Endpoint::new("alice", alice_id, dir.clone(), SessionSettings::default()).unwrap();
    let mut bob = Endpoint::new("bob", bob_id, dir, SessionSettings::default()).unwrap();

    let init = alice.initiate("bob").unwrap();
    let (at_alice, at_bob) = refs(init.message.session_id());

    // Mallory copies alice's session id into a KEY_INIT she signs herself,
    // and it reaches bob first.
    let settings = HandshakeSettings::default();
    let (mut mallory_init, _) =
        Handshake::new(&mallory_id, &settings).start("mallory", "bob").unwrap();
    mallory_init.body.session_id = at_bob.session_id;
    let signature = mallory_id.sign(&mallory_init.body.canonical_bytes()).unwrap();
    let progress = bob
        .handle(ProtocolMessage::KeyInit { body: mallory_init.body, signature })
        .unwrap();
    let at_bob_mallory = SessionRef::new("mallory", at_bob.session_id);
    assert_eq!(progress.key_ready, Some(at_bob_mallory.clone()));

    pump(&mut alice, &mut bob, init);
    assert_eq!(alice.state(&at_alice), Some(HandshakeState::Confirmed));
    assert_eq!(bob.state(&at_bob), Some(HandshakeState::Confirmed));
    assert_eq!(bob.session(&at_bob).unwrap().peer_username(), "alice");
    // Mallory's session is untouched by alice's confirmation.
    assert_eq!(bob.state(&at_bob_mallory), Some(HandshakeState::AwaitingPeerConfirm));

    let env = alice.seal(&at_alice, b"still mine").unwrap();
    assert_eq!(plaintext(bob.open(env).unwrap()), b"still mine");
}

#[test]
fn mislabelled_confirmation_is_discarded() {
    let (mut alice, mut bob) = parties(SessionSettings::default());
    let init = alice.initiate("bob").unwrap();
    let resp = bob.handle(init.message).unwrap().outbound.remove(0);
    let confirm = alice.handle(resp.message).unwrap().outbound.remove(0);

    let ProtocolMessage::KeyConfirmA(payload) = confirm.message else {
        panic!("expected KEY_CONFIRM_A");
    };
    let progress = bob.handle(ProtocolMessage::KeyConfirmB(payload.clone())).unwrap();
    assert_eq!(progress.discarded.len(), 1);

    // The genuine message still completes the handshake.
    let progress = bob.handle(ProtocolMessage::KeyConfirmA(payload)).unwrap();
    assert!(progress.confirmed.is_some());
    assert_eq!(progress.outbound.len(), 1);
}

#[test]
fn sending_is_refused_before_confirmation() {
    let (mut alice, mut bob) = parties(SessionSettings::default());
    let init = alice.initiate("bob").unwrap();
    let (at_alice, at_bob) = refs(init.message.session_id());
    bob.handle(init.message).unwrap();

    assert!(matches!(bob.seal(&at_bob, b"too early"), Err(SessionError::ProtocolState(_))));
    assert!(matches!(alice.seal(&at_alice, b"too early"), Err(SessionError::ProtocolState(_))));
}

#[test]
fn early_envelope_is_deferred_until_key_derivation() {
    let settings = SessionSettings { require_confirmed_to_send: false, ..SessionSettings::default() };
    let (mut alice, mut bob) = parties(settings);
    let init = alice.initiate("bob").unwrap();
    let (at_alice, at_bob) = refs(init.message.session_id());
    let resp = bob.handle(init.message).unwrap().outbound.remove(0);

    // Bob holds a key already and sends before alice has seen KEY_RESP.
    let early = bob.seal(&at_bob, b"early").unwrap();
    assert!(matches!(alice.open(early).unwrap(), Opened::Deferred));
    assert!(alice.take_deferred(&at_alice).is_empty());

    let progress = alice.handle(resp.message).unwrap();
    assert_eq!(progress.key_ready, Some(at_alice.clone()));
    let released = alice.take_deferred(&at_alice);
    assert_eq!(released.len(), 1);
    for env in released {
        assert_eq!(plaintext(alice.open(env).unwrap()), b"early");
    }
}

#[test]
fn deferral_queue_is_bounded() {
    let settings = SessionSettings {
        require_confirmed_to_send: false,
        max_deferred_per_session: 1,
        ..SessionSettings::default()
    };
    let (mut alice, mut bob) = parties(settings);
    let init = alice.initiate("bob").unwrap();
    let (_, at_bob) = refs(init.message.session_id());
    bob.handle(init.message).unwrap();

    let first = bob.seal(&at_bob, b"1").unwrap();
    let second = bob.seal(&at_bob, b"2").unwrap();
    assert!(matches!(alice.open(first).unwrap(), Opened::Deferred));
    assert!(matches!(alice.open(second), Err(SessionError::ProtocolState(_))));
}

#[test]
fn envelope_for_someone_else_is_malformed() {
    let (mut alice, mut bob, at_alice, _) = established(SessionSettings::default());
    let mut env = alice.seal(&at_alice, b"hi").unwrap();
    env.to = "carol".into();
    assert!(matches!(bob.open(env), Err(SessionError::MalformedMessage(_))));
}

#[test]
fn concurrent_sessions_are_independent() {
    let (mut alice, mut bob) = parties(SessionSettings::default());
    let first = alice.initiate("bob").unwrap();
    let second = alice.initiate("bob").unwrap();
    let (s1, s2) = (first.session(), second.session());
    pump(&mut alice, &mut bob, first);
    pump(&mut alice, &mut bob, second);

    assert_ne!(s1, s2);
    assert_ne!(alice.session(&s1).unwrap().session_key(), alice.session(&s2).unwrap().session_key());

    // An envelope sealed in one session does not open in the other.
    let mut env = alice.seal(&s1, b"hi").unwrap();
    env.session_id = s2.session_id;
    assert!(matches!(bob.open(env), Err(SessionError::Decryption)));
}
