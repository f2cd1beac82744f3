//! SMIL media overlay documents and clock values.

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::book::{MediaOverlay, MediaOverlayEntry};
use crate::error::MediaOverlayError;
use crate::util::{OpenElements, attr, local_name, parent_dir, resolve_href, split_fragment};

/// Parse a SMIL clock value into seconds.
///
/// Accepts full clocks (`1:02:03.5`), partial clocks (`02:03.5`) and
/// timecounts with an optional metric (`12.5s`, `300ms`, `2min`, `1h`, `7`).
pub fn parse_clock(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }

    if value.contains(':') {
        let parts: Vec<&str> = value.split(':').collect();
        let (hours, minutes, seconds) = match parts.as_slice() {
            [h, m, s] => (h.parse::<u64>().ok()?, m.parse::<u64>().ok()?, s.parse::<f64>().ok()?),
            [m, s] => (0, m.parse::<u64>().ok()?, s.parse::<f64>().ok()?),
            _ => return None,
        };
        if (parts.len() == 3 && minutes >= 60) || !(0.0..60.0).contains(&seconds) {
            return None;
        }
        return Some(hours as f64 * 3600.0 + minutes as f64 * 60.0 + seconds);
    }

    let (number, scale) = if let Some(n) = value.strip_suffix("ms") {
        (n, 0.001)
    } else if let Some(n) = value.strip_suffix("min") {
        (n, 60.0)
    } else if let Some(n) = value.strip_suffix('h') {
        (n, 3600.0)
    } else if let Some(n) = value.strip_suffix('s') {
        (n, 1.0)
    } else {
        (value, 1.0)
    };
    let number: f64 = number.trim().parse().ok()?;
    (number.is_finite() && number >= 0.0).then_some(number * scale)
}

#[derive(Default)]
struct Par {
    text_src: Option<String>,
    audio_src: Option<String>,
    clip_begin: Option<String>,
    clip_end: Option<String>,
}

/// Parse the overlay at `smil_path` narrating the document at `text_path`.
///
/// `<par>` elements whose text points into another document are skipped.
/// Ranges must come out sorted and non-overlapping, else the whole overlay is
/// rejected.
pub fn parse_smil(content: &str, smil_path: &str, text_path: &str) -> Result<MediaOverlay, MediaOverlayError> {
    let base = parent_dir(smil_path);
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut entries: Vec<MediaOverlayEntry> = Vec::new();
    let mut current: Option<Par> = None;
    let mut elements = OpenElements::default();
    let xml_error = |e: quick_xml::Error| MediaOverlayError::Xml {
        overlay: smil_path.to_string(),
        message: e.to_string(),
    };

    loop {
        let event = reader.read_event().map_err(xml_error)?;
        elements.track(&event);
        match event {
            Event::Start(e) | Event::Empty(e) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"par" => current = Some(Par::default()),
                    b"text" => {
                        if let Some(par) = current.as_mut() {
                            par.text_src = attr(&e, b"src");
                        }
                    }
                    b"audio" => {
                        if let Some(par) = current.as_mut() {
                            par.audio_src = attr(&e, b"src");
                            par.clip_begin = attr(&e, b"clipBegin").or_else(|| attr(&e, b"clip-begin"));
                            par.clip_end = attr(&e, b"clipEnd").or_else(|| attr(&e, b"clip-end"));
                        }
                    }
                    _ => {}
                }
            }
            Event::End(e) => {
                if local_name(e.name().as_ref()) == b"par"
                    && let Some(par) = current.take()
                    && let Some(entry) = par_entry(par, base, text_path, smil_path)?
                {
                    entries.push(entry);
                }
            }
            Event::Eof => {
                elements.check_closed().map_err(xml_error)?;
                break;
            }
            _ => {}
        }
    }

    MediaOverlay::new(entries).map_err(|index| MediaOverlayError::UnsortedRanges {
        overlay: smil_path.to_string(),
        index,
    })
}

fn par_entry(
    par: Par,
    base: &str,
    text_path: &str,
    smil_path: &str,
) -> Result<Option<MediaOverlayEntry>, MediaOverlayError> {
    let Some(text_src) = par.text_src else {
        return Ok(None);
    };
    let (doc, fragment) = split_fragment(&text_src);
    let Some(fragment) = fragment else {
        return Ok(None);
    };
    if !doc.is_empty() && resolve_href(base, doc) != text_path {
        return Ok(None);
    }

    let clock = |value: Option<String>, default: Option<f64>| -> Result<f64, MediaOverlayError> {
        match value {
            Some(v) => parse_clock(&v).ok_or_else(|| MediaOverlayError::InvalidClock {
                overlay: smil_path.to_string(),
                value: v,
            }),
            None => default.ok_or_else(|| MediaOverlayError::InvalidClock {
                overlay: smil_path.to_string(),
                value: String::new(),
            }),
        }
    };
    let start = clock(par.clip_begin, Some(0.0))?;
    let end = clock(par.clip_end, None)?;

    Ok(Some(MediaOverlayEntry {
        fragment_id: fragment.to_string(),
        start,
        end,
        audio_path: par.audio_src.map(|src| resolve_href(base, &src)),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clock() {
        assert_eq!(parse_clock("0:00:03.200"), Some(3.2));
        assert_eq!(parse_clock("1:02:03"), Some(3723.0));
        assert_eq!(parse_clock("02:03.5"), Some(123.5));
        assert_eq!(parse_clock("12.5s"), Some(12.5));
        assert_eq!(parse_clock("300ms"), Some(0.3));
        assert_eq!(parse_clock("2min"), Some(120.0));
        assert_eq!(parse_clock("1h"), Some(3600.0));
        assert_eq!(parse_clock("7"), Some(7.0));
        assert_eq!(parse_clock(""), None);
        assert_eq!(parse_clock("abc"), None);
        assert_eq!(parse_clock("0:75:00"), None);
        assert_eq!(parse_clock("-3s"), None);
    }

    const SMIL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<smil xmlns="http://www.w3.org/ns/SMIL" xmlns:epub="http://www.idpf.org/2007/ops" version="3.0">
  <body>
    <seq id="seq1" epub:textref="../text/ch2.xhtml">
      <par id="p1">
        <text src="../text/ch2.xhtml#frag1"/>
        <audio src="../audio/ch2.mp3" clipBegin="0:00:00.000" clipEnd="0:00:03.200"/>
      </par>
      <par id="p2">
        <text src="../text/ch2.xhtml#frag2"/>
        <audio src="../audio/ch2.mp3" clipBegin="3.2s" clipEnd="7s"/>
      </par>
      <par id="other">
        <text src="../text/ch3.xhtml#x"/>
        <audio src="../audio/ch3.mp3" clipBegin="0s" clipEnd="1s"/>
      </par>
    </seq>
  </body>
</smil>"#;

    #[test]
    fn test_parse_smil() {
        let overlay = parse_smil(SMIL, "OEBPS/smil/ch2.smil", "OEBPS/text/ch2.xhtml").unwrap();
        assert_eq!(overlay.len(), 2);

        let entries = overlay.entries();
        assert_eq!(entries[0].fragment_id, "frag1");
        assert_eq!(entries[0].start, 0.0);
        assert_eq!(entries[0].end, 3.2);
        assert_eq!(entries[0].audio_path.as_deref(), Some("OEBPS/audio/ch2.mp3"));
        assert_eq!(entries[1].fragment_id, "frag2");
        assert_eq!(entries[1].start, 3.2);
        assert_eq!(entries[1].end, 7.0);
    }

    #[test]
    fn test_parse_smil_unsorted() {
        let smil = r#"<smil><body>
  <par><text src="ch.xhtml#b"/><audio src="a.mp3" clipBegin="5s" clipEnd="6s"/></par>
  <par><text src="ch.xhtml#a"/><audio src="a.mp3" clipBegin="0s" clipEnd="1s"/></par>
</body></smil>"#;
        let result = parse_smil(smil, "ch.smil", "ch.xhtml");
        assert_eq!(
            result,
            Err(MediaOverlayError::UnsortedRanges {
                overlay: "ch.smil".into(),
                index: 1
            })
        );
    }

    #[test]
    fn test_parse_smil_bad_clock() {
        let smil = r#"<smil><body>
  <par><text src="ch.xhtml#a"/><audio src="a.mp3" clipBegin="soon" clipEnd="6s"/></par>
</body></smil>"#;
        assert!(matches!(
            parse_smil(smil, "ch.smil", "ch.xhtml"),
            Err(MediaOverlayError::InvalidClock { .. })
        ));
    }

    #[test]
    fn test_parse_smil_truncated() {
        let smil = r#"<smil><body>
  <par><text src="ch.xhtml#a"/><audio src="a.mp3" clipBegin="0s" clipEnd="1s"/></par>"#;
        assert!(matches!(
            parse_smil(smil, "ch.smil", "ch.xhtml"),
            Err(MediaOverlayError::Xml { .. })
        ));
    }
}
