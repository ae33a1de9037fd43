//! Colour palette applied to the workbook theme.
//!
//! The writer ships the 2007 Office theme. Once [`ensure_applied`] has been
//! called, every workbook post-processed afterwards in this process gets the
//! current Office palette instead.

use std::sync::OnceLock;

use tracing::info;

/// Archive entry holding the theme template.
pub const THEME_ENTRY: &str = "xl/theme/theme1.xml";

/// Legacy colour → current colour, in substitution order.
pub const PALETTE: [(&str, &str); 10] = [
    ("1F497D", "44546A"),
    ("EEECE1", "E7E6E6"),
    ("4F81BD", "5B9BD5"),
    ("C0504D", "ED7D31"),
    ("9BBB59", "A5A5A5"),
    ("8064A2", "FFC000"),
    ("4BACC6", "4472C4"),
    ("F79646", "70AD47"),
    ("0000FF", "0563C1"),
    ("800080", "954F72"),
];

static PALETTE_ENABLED: OnceLock<()> = OnceLock::new();

/// Enables the palette for the rest of the process.
///
/// Returns `true` only for the call that enabled it; later calls do nothing.
pub fn ensure_applied() -> bool {
    let mut enabled_now = false;
    PALETTE_ENABLED.get_or_init(|| enabled_now = true);
    if enabled_now {
        info!("theme palette substitution enabled");
    }
    enabled_now
}

pub fn is_applied() -> bool {
    PALETTE_ENABLED.get().is_some()
}

/// Rewrites every legacy `val="XXXXXX"` colour of a theme document.
pub fn substitute_palette(xml: &str) -> String {
    PALETTE
        .iter()
        .fold(xml.to_string(), |xml, (legacy, current)| {
            xml.replace(&format!("val=\"{legacy}\""), &format!("val=\"{current}\""))
        })
}

/// Byte-level variant of [`substitute_palette`]. Non UTF-8 input is returned unchanged.
pub fn patch_theme(data: Vec<u8>) -> Vec<u8> {
    match String::from_utf8(data) {
        Ok(xml) => substitute_palette(&xml).into_bytes(),
        Err(error) => error.into_bytes(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THEME_SAMPLE: &str = r#"<a:dk2><a:srgbClr val="1F497D"/></a:dk2><a:lt2><a:srgbClr val="EEECE1"/></a:lt2><a:accent1><a:srgbClr val="4F81BD"/></a:accent1><a:hlink><a:srgbClr val="0000FF"/></a:hlink><a:folHlink><a:srgbClr val="800080"/></a:folHlink>"#;

    #[test]
    fn legacy_colours_are_replaced() {
        let patched = substitute_palette(THEME_SAMPLE);

        assert!(patched.contains(r#"val="44546A""#));
        assert!(patched.contains(r#"val="E7E6E6""#));
        assert!(patched.contains(r#"val="5B9BD5""#));
        assert!(patched.contains(r#"val="0563C1""#));
        assert!(patched.contains(r#"val="954F72""#));
        for (legacy, _) in PALETTE {
            assert!(!patched.contains(&format!("val=\"{legacy}\"")));
        }
    }

    #[test]
    fn substitution_is_idempotent() {
        let once = substitute_palette(THEME_SAMPLE);
        let twice = substitute_palette(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn colours_outside_attributes_are_kept() {
        let xml = "<a:t>1F497D</a:t>";
        assert_eq!(substitute_palette(xml), xml);
    }

    #[test]
    fn enabling_twice_is_a_no_op() {
        ensure_applied();
        assert!(is_applied());
        assert!(!ensure_applied());
    }
}
