#![no_main]
use libfuzzer_sys::fuzz_target;
use ocea_exporter::api::MaintenanceResponse;
use ocea_exporter::auth::{B2cSettingsExtractor, PageSettingsExtractor};

fuzz_target!(|data: &[u8]| {
    // Response bodies the exporter inspects before trusting them
    let _ = MaintenanceResponse::detect(data);

    if let Ok(page) = std::str::from_utf8(data)
        && let Ok(extractor) = B2cSettingsExtractor::new()
    {
        let _ = extractor.extract(page);
    }
});
