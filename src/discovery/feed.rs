//! RSS and Atom item links.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;

/// Item links of an RSS 2.0, RSS 1.0 or Atom feed, in document order.
pub fn parse_feed(xml: &str) -> Result<Vec<String>, String> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut links = Vec::new();
    let mut in_item = false;
    let mut in_link = false;
    let mut current = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"item" | b"entry" => in_item = true,
                b"link" if in_item => {
                    if let Some(href) = atom_href(&e) {
                        links.push(href);
                    } else {
                        in_link = true;
                        current.clear();
                    }
                }
                _ => {}
            },
            Ok(Event::Empty(e)) if in_item && e.local_name().as_ref() == b"link" => {
                if let Some(href) = atom_href(&e) {
                    links.push(href);
                }
            }
            Ok(Event::Text(e)) if in_link => {
                current.push_str(&e.unescape().map_err(|e| e.to_string())?);
            }
            Ok(Event::CData(e)) if in_link => {
                current.push_str(&String::from_utf8_lossy(&e.into_inner()));
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"link" if in_link => {
                    in_link = false;
                    let link = current.trim();
                    if !link.is_empty() {
                        links.push(link.to_string());
                    }
                }
                b"item" | b"entry" => in_item = false,
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(e.to_string()),
            _ => {}
        }
    }

    Ok(links)
}

/// `href` of an Atom `<link>` that points at the entry itself.
fn atom_href(e: &BytesStart<'_>) -> Option<String> {
    let rel = e
        .try_get_attribute("rel")
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()));
    if rel.as_deref().is_some_and(|r| r != "alternate") {
        return None;
    }
    e.try_get_attribute("href")
        .ok()
        .flatten()
        .and_then(|a| a.unescape_value().ok().map(|v| v.trim().to_string()))
        .filter(|href| !href.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rss_items() {
        let xml = r#"<rss version="2.0"><channel>
<title>Tax Bulletins</title>
<link>https://tax.gov/</link>
<item><title>One</title><link>https://tax.gov/b/1</link></item>
<item><title>Two</title><link><![CDATA[https://tax.gov/b/2]]></link></item>
</channel></rss>"#;
        assert_eq!(
            parse_feed(xml).unwrap(),
            vec!["https://tax.gov/b/1", "https://tax.gov/b/2"]
        );
    }

    #[test]
    fn test_atom_entries() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom">
<link href="https://tax.gov/feed" rel="self"/>
<entry><title>A</title><link href="https://tax.gov/a" rel="alternate"/></entry>
<entry><title>B</title><link rel="enclosure" href="https://tax.gov/b.mp3"/><link href="https://tax.gov/b"/></entry>
</feed>"#;
        assert_eq!(
            parse_feed(xml).unwrap(),
            vec!["https://tax.gov/a", "https://tax.gov/b"]
        );
    }
}
