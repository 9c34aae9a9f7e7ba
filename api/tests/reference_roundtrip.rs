use proptest::prelude::*;

use api::reference::{decode, encode};

proptest! {
    #[test]
    fn decode_encode_is_identity(message_id in 0u64..(1u64 << 63)) {
        let reference = encode(message_id).unwrap();
        prop_assert_eq!(decode(&reference).unwrap(), message_id);
    }

    #[test]
    fn decode_never_panics_on_arbitrary_strings(s in "\\PC*") {
        let _ = decode(&s);
    }
}
