//! Namespace-agnostic XML value extraction for WS-Discovery replies

/// Extract every text value of `tag`, whatever its namespace prefix
pub fn extract_xml_values(xml: &str, tag: &str) -> Vec<String> {
    let mut values = Vec::new();
    let mut rest = xml;

    while let Some(open) = find_open_tag(rest, tag) {
        let after_open = &rest[open..];
        let Some(gt) = after_open.find('>') else {
            break;
        };
        // self-closing tag carries no value
        if after_open[..gt].ends_with('/') {
            rest = &after_open[gt + 1..];
            continue;
        }
        let content = &after_open[gt + 1..];
        let Some(end) = content.find("</") else {
            break;
        };
        let value = content[..end].trim();
        if !value.is_empty() {
            values.push(value.to_string());
        }
        rest = &content[end..];
    }

    values
}

/// Extract the first text value of `tag`
pub fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    extract_xml_values(xml, tag).into_iter().next()
}

/// Position of the next `<tag` or `<prefix:tag` opening element
fn find_open_tag(xml: &str, tag: &str) -> Option<usize> {
    let mut offset = 0;
    while let Some(lt) = xml[offset..].find('<') {
        let start = offset + lt;
        let name_start = start + 1;
        let name_end = xml[name_start..]
            .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
            .map(|i| name_start + i)
            .unwrap_or(xml.len());
        let name = &xml[name_start..name_end];
        let local = name.rsplit(':').next().unwrap_or(name);
        if local == tag && !name.starts_with('/') {
            return Some(start);
        }
        offset = name_start;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefixed_and_plain_tags() {
        let xml = r#"<d:ProbeMatch><d:XAddrs>http://10.0.0.5/onvif/device_service</d:XAddrs></d:ProbeMatch>
<ProbeMatch><XAddrs> http://10.0.0.6:8080/onvif/device_service </XAddrs></ProbeMatch>"#;
        assert_eq!(
            extract_xml_values(xml, "XAddrs"),
            vec![
                "http://10.0.0.5/onvif/device_service",
                "http://10.0.0.6:8080/onvif/device_service"
            ]
        );
    }

    #[test]
    fn test_does_not_match_longer_names() {
        let xml = "<a:XAddrsExtra>nope</a:XAddrsExtra><a:XAddrs>yes</a:XAddrs>";
        assert_eq!(extract_xml_value(xml, "XAddrs"), Some("yes".to_string()));
    }

    #[test]
    fn test_missing_and_self_closing() {
        assert_eq!(extract_xml_value("<a:Types/>", "Types"), None);
        assert_eq!(extract_xml_value("<Other>x</Other>", "XAddrs"), None);
    }
}
