#![no_main]

use libfuzzer_sys::fuzz_target;
use quantsim::io::EncodingFile;
use quantsim::quant::Encoding;

/// Fuzz target for encoding file parsing
///
/// Arbitrary JSON must either fail to parse or yield records whose validation
/// never panics. Accepted records re-export to themselves.

fuzz_target!(|data: &[u8]| {
    let Ok(file) = serde_json::from_slice::<EncodingFile>(data) else {
        return;
    };

    for records in file.activation_encodings.values().chain(file.param_encodings.values()) {
        for record in records {
            if let Ok(encoding) = Encoding::try_from(*record) {
                assert!(encoding.delta() > 0.0);
                assert_eq!(encoding.to_record().bitwidth, record.bitwidth);
                assert_eq!(Encoding::try_from(encoding.to_record()).ok(), Some(encoding));
            }
        }
    }
});
