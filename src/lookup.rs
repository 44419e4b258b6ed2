//! Hints for the metadata lookup that consumes scanned barcodes.

/// Second code to try when a lookup for `barcode` finds nothing.
///
/// Some discs carry an EAN-13 whose leading '8' is absent from the UPC
/// databases; dropping it yields the 12-digit UPC-A they do know.
pub fn retry_candidate(barcode: &str, enabled: bool) -> Option<String> {
    if !enabled || barcode.len() != 13 || !barcode.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    barcode.strip_prefix('8').map(str::to_string)
}
