//! Property tests for signed tokens and the device-trust state machine
//!
//! - Any claims signed by a key verify under that key before expiry
//! - Flipping any byte of a token makes it fail verification
//! - No sequence of transitions lets a device rotate without passing through
//!   `Active`

use proptest::prelude::*;
use pulse_core::{Claims, DeviceState, KeyId, Role, TokenPurpose, TokenSigner, UserId};

fn arb_claims() -> impl Strategy<Value = Claims> {
    (
        any::<u64>(),
        proptest::option::of(any::<[u8; 16]>()),
        any::<bool>(),
        any::<bool>(),
        0u64..1_000_000,
        1u64..1_000_000,
    )
        .prop_map(|(uid, kid, sudo, session, iat, lifetime)| Claims {
            uid: UserId(uid),
            kid: kid.map(KeyId::generate),
            role: if sudo { Role::Sudo } else { Role::Base },
            purpose: if session { TokenPurpose::Session } else { TokenPurpose::Access },
            iat,
            exp: iat + lifetime,
        })
}

fn arb_state() -> impl Strategy<Value = DeviceState> {
    prop_oneof![Just(DeviceState::Locked), Just(DeviceState::Active), Just(DeviceState::Revoked)]
}

#[derive(Debug, Clone, Copy)]
enum Transition {
    Unlock,
    Revoke(bool),
}

fn arb_transition() -> impl Strategy<Value = Transition> {
    prop_oneof![Just(Transition::Unlock), any::<bool>().prop_map(Transition::Revoke)]
}

proptest! {
    #[test]
    fn signed_claims_verify_before_expiry(claims in arb_claims(), key in any::<[u8; 32]>()) {
        let signer = TokenSigner::new(key);
        let token = signer.sign(&claims);

        prop_assert_eq!(signer.verify(&token, claims.purpose, claims.iat).unwrap(), claims.clone());
        prop_assert!(signer.verify(&token, claims.purpose, claims.exp).is_err());
    }

    #[test]
    fn any_flipped_byte_is_rejected(claims in arb_claims(), index in any::<prop::sample::Index>()) {
        let signer = TokenSigner::new([9; 32]);
        let token = signer.sign(&claims);

        let mut bytes = token.into_bytes();
        let at = index.index(bytes.len());
        bytes[at] = if bytes[at] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        prop_assert!(signer.verify(&tampered, claims.purpose, claims.iat).is_err());
    }

    #[test]
    fn rotation_requires_active(
        start in arb_state(),
        transitions in proptest::collection::vec(arb_transition(), 0..20),
    ) {
        let mut state = start;
        for transition in transitions {
            state = match transition {
                Transition::Unlock => state.unlock(),
                Transition::Revoke(revoke) => state.set_revoked(revoke),
            };
            prop_assert_eq!(state.can_rotate(), state == DeviceState::Active);
            prop_assert_eq!(state.is_revoked(), !state.can_rotate());
        }
    }

    #[test]
    fn revoking_never_trusts_a_locked_device(transitions in proptest::collection::vec(any::<bool>(), 0..10)) {
        let mut state = DeviceState::initial(false, false);
        for _ in transitions {
            state = state.set_revoked(true);
            prop_assert_eq!(state, DeviceState::Locked);
        }
    }
}
