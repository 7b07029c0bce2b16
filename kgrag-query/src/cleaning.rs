// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

/// Normalise model output into a bare SPARQL query.
///
/// Trims whitespace and removes a surrounding markdown code fence if the
/// model added one anyway. Anything else is kept verbatim.
pub fn clean_query(raw: &str) -> String {
    let trimmed = raw.trim();
    let Some(body) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the info string (```sparql) up to the first newline, or the
    // bare tag when the whole fence sits on one line.
    let body = match body.find('\n') {
        Some(idx) => &body[idx + 1..],
        None => strip_language_tag(body),
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

const LANGUAGE_TAG: &str = "sparql";

fn strip_language_tag(body: &str) -> &str {
    let body = body.trim_start();
    match body.get(..LANGUAGE_TAG.len()) {
        Some(tag) if tag.eq_ignore_ascii_case(LANGUAGE_TAG) => {
            let rest = &body[LANGUAGE_TAG.len()..];
            if rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c == '`') {
                rest
            } else {
                body
            }
        }
        _ => body,
    }
}
