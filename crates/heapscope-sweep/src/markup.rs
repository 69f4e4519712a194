//! HTML serialization of fragments.

use std::fmt::Write as _;

use crate::fragment::{Cell, Fragment, INVALID, NIL, RAISED_EXCEPTION, UNDECODABLE};

/// Escape text for HTML element content and attribute values.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

fn write_cell(out: &mut String, cell: &Cell) {
    // Writing into a `String` cannot fail.
    let _ = match cell {
        Cell::Text(text) => write!(out, "<span class=\"value\">{}</span>", escape_html(text)),
        Cell::Link { id, text } => write!(
            out,
            "<a href=\"#node-{0}\" data-path=\"{0}\">{1}</a>",
            id.get(),
            escape_html(text)
        ),
        Cell::BackRef { id, text } => write!(
            out,
            "<a class=\"backref\" href=\"#node-{0}\" data-path=\"{0}\">{1}</a>",
            id.get(),
            escape_html(text)
        ),
        Cell::Nil => write!(out, "<span class=\"sentinel\">{NIL}</span>"),
        Cell::Invalid(Some(id)) => write!(
            out,
            "<a class=\"sentinel\" href=\"#node-{0}\" data-path=\"{0}\">{INVALID}</a>",
            id.get()
        ),
        Cell::Invalid(None) => write!(out, "<span class=\"sentinel\">{INVALID}</span>"),
        Cell::Undecodable(reason) => write!(
            out,
            "<span class=\"sentinel\" title=\"{}\">{UNDECODABLE}</span>",
            escape_html(reason)
        ),
        Cell::RaisedException => write!(out, "<span class=\"sentinel\">{RAISED_EXCEPTION}</span>"),
    };
}

impl Fragment {
    pub fn to_markup(&self) -> String {
        let mut out = String::new();
        if let Some(error) = &self.error {
            let _ = writeln!(
                out,
                "<div class=\"fragment error\"><p class=\"error\">{}</p></div>",
                escape_html(error)
            );
            return out;
        }

        match self.node {
            Some(id) => {
                let _ = writeln!(out, "<div class=\"fragment\" data-node=\"{}\">", id.get());
            }
            None => out.push_str("<div class=\"fragment\">\n"),
        }
        let _ = writeln!(out, "<h3>{}</h3>", escape_html(&self.title));
        out.push_str("<ul>\n");
        for row in &self.rows {
            let _ = write!(
                out,
                "<li><span class=\"label\">{}</span> ",
                escape_html(&row.label)
            );
            write_cell(&mut out, &row.cell);
            out.push_str("</li>\n");
        }
        out.push_str("</ul>\n</div>\n");
        out
    }
}
