//! Prompt rendering and outline parsing.
//!
//! Prompts are plain `Field: value` lines so responders and tests can read them
//! back with [`field`].

use crate::artifact::{Outline, SectionSpec};
use crate::error::ProviderError;
use crate::provider::GenerationParams;
use crate::workflow::request::StyleParams;

const OUTLINE_HEADER: &str = "Create an outline for a presentation deck.";
const SECTION_HEADER: &str = "Write the body text for one section of a presentation deck.";
const IMAGE_HEADER: &str = "Create an illustration for one section of a presentation deck.";

pub fn outline_prompt(topic: &str, section_count: usize, style: &StyleParams) -> String {
    let mut prompt = String::new();
    prompt.push_str(OUTLINE_HEADER);
    prompt.push('\n');
    push_field(&mut prompt, "Topic", topic);
    push_field(&mut prompt, "Sections", &section_count.to_string());
    push_style(&mut prompt, style);
    prompt.push_str(&format!(
        "Respond with exactly {} sections. Start each section with a \"## <title>\" line followed by \"- <key point>\" lines.\n",
        section_count
    ));
    prompt
}

pub fn section_prompt(
    topic: &str,
    section_count: usize,
    spec: &SectionSpec,
    style: &StyleParams,
    instructions: Option<&str>,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(SECTION_HEADER);
    prompt.push('\n');
    push_field(&mut prompt, "Topic", topic);
    push_field(
        &mut prompt,
        "Position",
        &format!("{} of {}", spec.index + 1, section_count),
    );
    push_field(&mut prompt, "Title", &spec.title);
    push_field(&mut prompt, "Key points", &spec.key_points.join("; "));
    push_style(&mut prompt, style);
    if let Some(instructions) = instructions.filter(|i| !i.trim().is_empty()) {
        push_field(&mut prompt, "Instructions", instructions);
    }
    prompt
}

pub fn image_prompt(
    topic: &str,
    spec: &SectionSpec,
    style: &StyleParams,
    instructions: Option<&str>,
) -> String {
    let mut prompt = String::new();
    prompt.push_str(IMAGE_HEADER);
    prompt.push('\n');
    push_field(&mut prompt, "Topic", topic);
    push_field(&mut prompt, "Title", &spec.title);
    push_field(
        &mut prompt,
        "Style",
        &format!("{}, for a {} audience", style.tone, style.audience),
    );
    if let Some(instructions) = instructions.filter(|i| !i.trim().is_empty()) {
        push_field(&mut prompt, "Instructions", instructions);
    }
    prompt
}

pub fn alt_text(spec: &SectionSpec) -> String {
    match spec.key_points.first() {
        Some(point) => format!("Illustration for \"{}\": {}", spec.title, point),
        None => format!("Illustration for \"{}\"", spec.title),
    }
}

pub fn generation_params(style: &StyleParams) -> GenerationParams {
    GenerationParams {
        temperature: None,
        max_tokens: None,
        style: style.as_map(),
    }
}

/// Section count requested by an outline prompt; `None` for any other prompt
pub fn requested_section_count(prompt: &str) -> Option<usize> {
    if !prompt.starts_with(OUTLINE_HEADER) {
        return None;
    }
    field(prompt, "Sections")?.parse().ok()
}

/// Value of the first `name: value` line in a rendered prompt
pub fn field<'a>(prompt: &'a str, name: &str) -> Option<&'a str> {
    prompt.lines().find_map(|line| {
        line.strip_prefix(name)
            .and_then(|rest| rest.strip_prefix(": "))
            .map(str::trim)
    })
}

/// Parse a model response into exactly `expected` sections.
///
/// Markdown headings take precedence; numbered lines are headings only when the
/// response has no markdown headings. Extra sections are dropped, a shortfall is
/// a malformed response.
pub fn parse_outline(response: &str, expected: usize) -> Result<Outline, ProviderError> {
    let has_markdown = response
        .lines()
        .any(|line| line.trim_start().starts_with('#'));

    let mut sections: Vec<SectionSpec> = Vec::new();
    for line in response.lines().map(str::trim) {
        if line.is_empty() {
            continue;
        }
        let heading = if has_markdown {
            markdown_heading(line)
        } else {
            numbered_heading(line)
        };
        if let Some(title) = heading {
            if !title.is_empty() {
                sections.push(SectionSpec {
                    index: sections.len(),
                    title: title.to_string(),
                    key_points: Vec::new(),
                });
            }
            continue;
        }
        if let (Some(point), Some(current)) = (bullet(line), sections.last_mut()) {
            if !point.is_empty() {
                current.key_points.push(point.to_string());
            }
        }
    }

    if sections.len() < expected {
        return Err(ProviderError::MalformedResponse(format!(
            "outline has {} sections, expected {}",
            sections.len(),
            expected
        )));
    }
    sections.truncate(expected);
    Ok(Outline::new(sections))
}

fn markdown_heading(line: &str) -> Option<&str> {
    line.starts_with('#')
        .then(|| line.trim_start_matches('#').trim())
}

fn numbered_heading(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    let rest = &line[digits..];
    rest.strip_prefix(". ")
        .or_else(|| rest.strip_prefix(") "))
        .map(str::trim)
}

fn bullet(line: &str) -> Option<&str> {
    ["- ", "* ", "• "]
        .iter()
        .find_map(|marker| line.strip_prefix(marker))
        .map(str::trim)
}

fn push_field(prompt: &mut String, name: &str, value: &str) {
    // Newlines would break field lookup
    let value = value.replace('\n', " ");
    prompt.push_str(name);
    prompt.push_str(": ");
    prompt.push_str(value.trim());
    prompt.push('\n');
}

fn push_style(prompt: &mut String, style: &StyleParams) {
    push_field(prompt, "Tone", &style.tone);
    push_field(prompt, "Audience", &style.audience);
    push_field(prompt, "Language", &style.language);
    for (key, value) in &style.extra {
        push_field(prompt, key, value);
    }
}
