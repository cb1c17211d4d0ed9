//! Descriptor (NFO) rendering.

use chrono::Utc;

use crate::identify::IdentifiedMeta;
use crate::metadata::{ContentRecord, Person};

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

fn cdata(text: &str) -> String {
    format!("<![CDATA[{}]]>", text.replace("]]>", "]]]]><![CDATA[>"))
}

fn element(out: &mut String, indent: usize, name: &str, value: &str) {
    out.push_str(&"  ".repeat(indent));
    out.push_str(&format!("<{name}>{}</{name}>\n", escape(value)));
}

fn person(out: &mut String, tag: &str, person: &Person) {
    out.push_str(&format!("  <{tag}>\n"));
    element(out, 2, "name", &person.name);
    element(out, 2, "type", "Actor");
    if !person.id.is_empty() {
        element(out, 2, "catalogid", &person.id);
    }
    if let Some(thumb) = &person.thumb {
        element(out, 2, "thumb", thumb);
    }
    out.push_str(&format!("  </{tag}>\n"));
}

/// Renders a movie descriptor for `record`.
pub fn render_nfo(record: &ContentRecord, meta: &IdentifiedMeta) -> String {
    let code = meta.code().unwrap_or(&record.code);
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n<movie>\n");

    element(
        &mut out,
        1,
        "dateadded",
        &Utc::now().format("%Y-%m-%d %H:%M:%S").to_string(),
    );
    element(&mut out, 1, "id", code);
    out.push_str(&format!(
        "  <uniqueid type=\"catalog\" default=\"true\">{}</uniqueid>\n",
        escape(code)
    ));
    out.push_str(&format!("  <plot>{}</plot>\n", cdata(&record.title)));
    out.push_str(&format!("  <outline>{}</outline>\n", cdata(&record.title)));

    for director in &record.directors {
        element(&mut out, 1, "director", &director.name);
    }
    for actor in &record.actors {
        person(&mut out, "actor", actor);
    }
    for tag in &record.tags {
        element(&mut out, 1, "genre", tag);
    }
    element(&mut out, 1, "studio", &record.producer);
    element(&mut out, 1, "label", &record.publisher);
    element(&mut out, 1, "rating", &format!("{:.1}", record.rating));
    element(&mut out, 1, "title", &record.title);
    element(&mut out, 1, "originaltitle", &record.original_title);
    element(&mut out, 1, "premiered", &record.release_date);
    element(&mut out, 1, "year", &record.year);

    out.push_str("</movie>\n");
    out
}
