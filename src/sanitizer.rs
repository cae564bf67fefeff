//! Strips configured XML elements from a return before it leaves the system

use regex::Regex;

lazy_static! {
    static ref RE_BLANK_LINE: Regex = Regex::new(r"(?m)^[ \t]*\r?\n").expect("cannot compile regex");
}

/// Removes every `<tag>...</tag>` element (non-greedy, across lines) for each excluded tag,
/// then drops lines left blank. Tag names are trimmed and blank ones ignored.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    excluded: Vec<Regex>,
}

impl Sanitizer {
    pub fn new<I, S>(excluded_tags: I) -> Result<Sanitizer, regex::Error> where I: IntoIterator<Item=S>, S: AsRef<str> {
        let excluded = excluded_tags.into_iter()
            .filter_map(|tag| {
                let tag = tag.as_ref().trim();
                if tag.is_empty() {
                    return None;
                }
                let tag = regex::escape(tag);
                Some(Regex::new(&format!(r"<{}>[\s\S]*?</{}>", tag, tag)))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Sanitizer { excluded })
    }

    pub fn excluded_count(&self) -> usize {
        self.excluded.len()
    }

    pub fn sanitize(&self, xml: &str) -> String {
        let stripped = self.excluded.iter()
            .fold(xml.to_owned(), |xml, pattern| pattern.replace_all(&xml, "").into_owned());
        RE_BLANK_LINE.replace_all(&stripped, "").into_owned()
    }
}

pub fn sanitize(xml: &str, excluded_tags: &[&str]) -> Result<String, regex::Error> {
    Ok(Sanitizer::new(excluded_tags)?.sanitize(xml))
}
