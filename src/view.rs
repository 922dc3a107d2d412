use std::sync::Arc;

use parking_lot::Mutex;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use textwrap::{wrap, Options as WrapOptions};
use unicode_width::UnicodeWidthStr;

use crate::listing::Listing;
use crate::reputation::{ReputationState, VoteControl};
use crate::widget::{element_id, ElementKind, Instance, VoteView, CLICKED_CLASS};

const UPVOTE_GLYPH: &str = "▲";
const DOWNVOTE_GLYPH: &str = "▼";
const PREVIEW_DESCRIPTION_CHARS: usize = 140;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    pub tag: String,
    pub classes: Vec<String>,
    pub id: Option<String>,
    pub text: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<Element>,
}

impl Element {
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Self::default()
        }
    }

    pub fn with_class(mut self, class: &str) -> Self {
        for name in class.split_whitespace() {
            self.add_class(name);
        }
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn child(mut self, child: Element) -> Self {
        self.children.push(child);
        self
    }

    pub fn children(mut self, children: impl IntoIterator<Item = Element>) -> Self {
        self.children.extend(children);
        self
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.classes.iter().any(|c| c == class)
    }

    pub fn add_class(&mut self, class: &str) {
        if !self.has_class(class) {
            self.classes.push(class.to_string());
        }
    }

    pub fn remove_class(&mut self, class: &str) {
        self.classes.retain(|c| c != class);
    }

    /// Sets or clears `class`; unlike a toggle, repeated calls are idempotent.
    pub fn set_class(&mut self, class: &str, present: bool) {
        if present {
            self.add_class(class);
        } else {
            self.remove_class(class);
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| key == name) {
            Some(entry) => entry.1 = value,
            None => self.attributes.push((name.to_string(), value)),
        }
    }

    pub fn find_by_id(&self, id: &str) -> Option<&Element> {
        if self.id.as_deref() == Some(id) {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find_by_id(id))
    }

    pub fn find_by_id_mut(&mut self, id: &str) -> Option<&mut Element> {
        if self.id.as_deref() == Some(id) {
            return Some(self);
        }
        self.children
            .iter_mut()
            .find_map(|child| child.find_by_id_mut(id))
    }

    /// Own text followed by every descendant's text.
    pub fn text_content(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.children {
            out.push_str(&child.text_content());
        }
        out
    }

    fn is_inline(&self) -> bool {
        matches!(self.tag.as_str(), "span" | "button")
    }
}

pub fn div(class: &str) -> Element {
    Element::new("div").with_class(class)
}

pub fn section(class: &str) -> Element {
    Element::new("section").with_class(class)
}

pub fn p(text: impl Into<String>, class: &str) -> Element {
    Element::new("p").with_class(class).with_text(text)
}

pub fn span(text: impl Into<String>, class: &str) -> Element {
    Element::new("span").with_class(class).with_text(text)
}

/// Heading element `h1`..`h6`; out of range levels are clamped.
pub fn h(level: u8, text: impl Into<String>) -> Element {
    Element::new(format!("h{}", level.clamp(1, 6))).with_text(text)
}

pub fn img(src: &str, alt: &str) -> Element {
    Element::new("img")
        .with_attr("src", src)
        .with_attr("alt", alt)
}

pub fn a(href: &str, text: impl Into<String>) -> Element {
    Element::new("a").with_attr("href", href).with_text(text)
}

pub fn button(text: impl Into<String>, id: impl Into<String>) -> Element {
    Element::new("button").with_id(id).with_text(text)
}

/// Vote buttons and counters for one rendered instance of `key`.
pub fn vote_controls(instance: Instance, key: &str) -> Element {
    let control = |control: VoteControl, glyph: &str| {
        [
            button(glyph, element_id(ElementKind::Button(control), instance, key))
                .with_class("reputation-button"),
            span("0", "reputation-count")
                .with_id(element_id(ElementKind::Count(control), instance, key)),
        ]
    };
    div("reputation")
        .children(control(VoteControl::Upvote, UPVOTE_GLYPH))
        .children(control(VoteControl::Downvote, DOWNVOTE_GLYPH))
}

pub fn listing_preview(listing: &Listing) -> Element {
    let mut description: String = listing
        .description
        .chars()
        .take(PREVIEW_DESCRIPTION_CHARS)
        .collect();
    if listing.description.chars().count() > PREVIEW_DESCRIPTION_CHARS {
        description.push('…');
    }

    section("listing-preview")
        .with_attr("data-key", &listing.key)
        .child(h(3, &listing.name))
        .child(p(
            format!(
                "{} · {} · {}",
                listing.listing_type.label(),
                listing.location,
                listing.created_label()
            ),
            "listing-meta",
        ))
        .child(p(description, "listing-description"))
        .child(vote_controls(Instance::Preview, &listing.key))
}

pub fn listing_detailed(listing: &Listing) -> Element {
    let mut card = section("listing-detailed")
        .with_attr("data-key", &listing.key)
        .child(h(2, &listing.name))
        .child(p(
            format!(
                "{} · {} · created {} · {} views",
                listing.listing_type.label(),
                listing.location,
                listing.created_label(),
                listing.views
            ),
            "listing-meta",
        ));

    if !listing.image_url.is_empty() {
        card = card.child(img(&listing.image_url, &listing.name));
    }
    card = card
        .child(h(4, "About"))
        .child(p(&listing.description, "listing-description"))
        .child(h(4, "How to help"))
        .child(p(&listing.how_to_help, "listing-how-to-help"));

    if !listing.website.is_empty() {
        card = card.child(a(&listing.website, "Website"));
    }
    let tags = listing.tag_list();
    if !tags.is_empty() {
        card = card.child(div("listing-tags").children(
            tags.iter().map(|tag| span(format!("#{tag} "), "listing-tag")),
        ));
    }
    card.child(vote_controls(Instance::Detailed, &listing.key))
}

/// Projects vote state onto one rendered card element.
pub struct ElementVoteView {
    instance: Instance,
    key: String,
    element: Arc<Mutex<Element>>,
}

impl ElementVoteView {
    pub fn new(instance: Instance, key: impl Into<String>, element: Arc<Mutex<Element>>) -> Self {
        Self {
            instance,
            key: key.into(),
            element,
        }
    }
}

impl VoteView for ElementVoteView {
    fn instance(&self) -> Instance {
        self.instance
    }

    fn render(&mut self, state: &ReputationState) {
        let mut element = self.element.lock();
        for control in [VoteControl::Upvote, VoteControl::Downvote] {
            let button_id = element_id(ElementKind::Button(control), self.instance, &self.key);
            if let Some(button) = element.find_by_id_mut(&button_id) {
                button.set_class(CLICKED_CLASS, state.is_clicked(control));
            }
            let count_id = element_id(ElementKind::Count(control), self.instance, &self.key);
            if let Some(count) = element.find_by_id_mut(&count_id) {
                count.text = state.count(control).to_string();
            }
        }
    }
}

/// A preview card painted once from the listing's own counts, with no
/// widget behind it.
pub fn painted_preview(listing: &Listing) -> Element {
    let element = Arc::new(Mutex::new(listing_preview(listing)));
    let mut painter = ElementVoteView::new(Instance::Preview, listing.key.clone(), Arc::clone(&element));
    painter.render(&ReputationState::seed(
        listing.key.clone(),
        listing.vote,
        listing.upvotes,
        listing.downvotes,
    ));
    let painted = element.lock().clone();
    painted
}

/// Lays an element tree out as terminal lines no wider than `width`.
pub fn render_lines(element: &Element, width: usize) -> Vec<Line<'static>> {
    let mut lines = Vec::new();
    render_into(element, width, &mut lines);
    lines
}

fn render_into(element: &Element, width: usize, lines: &mut Vec<Line<'static>>) {
    match element.tag.as_str() {
        "h1" | "h2" | "h3" => lines.extend(wrap_styled(
            &element.text,
            width,
            Style::default().add_modifier(Modifier::BOLD),
        )),
        "h4" | "h5" | "h6" => lines.extend(wrap_styled(
            &element.text,
            width,
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )),
        "p" => {
            let style = if element.has_class("listing-meta") {
                Style::default().fg(Color::DarkGray)
            } else {
                Style::default()
            };
            lines.extend(wrap_styled(&element.text, width, style));
        }
        "img" => {
            let src = element.attr("src").unwrap_or_default();
            lines.push(Line::from(Span::styled(
                truncate(&format!("[image] {src}"), width),
                Style::default().fg(Color::DarkGray),
            )));
        }
        "a" => {
            let href = element.attr("href").unwrap_or_default();
            lines.push(Line::from(vec![
                Span::styled(
                    element.text.clone(),
                    Style::default().add_modifier(Modifier::UNDERLINED),
                ),
                Span::raw(" "),
                Span::styled(
                    truncate(href, width.saturating_sub(element.text.width() + 1)),
                    Style::default().fg(Color::Blue),
                ),
            ]));
        }
        _ if element.is_inline() => lines.push(Line::from(inline_span(element))),
        _ => {
            if !element.children.is_empty() && element.children.iter().all(Element::is_inline) {
                let spans: Vec<Span<'static>> = element.children.iter().map(inline_span).collect();
                lines.push(Line::from(spans));
                return;
            }
            if !element.text.is_empty() {
                lines.extend(wrap_styled(&element.text, width, Style::default()));
            }
            for child in &element.children {
                render_into(child, width, lines);
            }
        }
    }
}

fn inline_span(element: &Element) -> Span<'static> {
    if element.tag == "button" {
        let style = if element.has_class(CLICKED_CLASS) {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::REVERSED)
        } else {
            Style::default().fg(Color::Gray)
        };
        return Span::styled(format!(" {} ", element.text), style);
    }
    let style = if element.has_class("listing-tag") {
        Style::default().fg(Color::Magenta)
    } else {
        Style::default()
    };
    Span::styled(format!("{} ", element.text), style)
}

fn wrap_styled(text: &str, width: usize, style: Style) -> Vec<Line<'static>> {
    if text.trim().is_empty() {
        return Vec::new();
    }
    let options = WrapOptions::new(width.max(8)).break_words(true);
    wrap(text, options)
        .into_iter()
        .map(|cow| Line::from(Span::styled(cow.into_owned(), style)))
        .collect()
}

fn truncate(text: &str, width: usize) -> String {
    if text.width() <= width {
        return text.to_string();
    }
    let mut out = String::new();
    let mut used = 0;
    for ch in text.chars() {
        let w = unicode_width::UnicodeWidthChar::width(ch).unwrap_or(0);
        if used + w + 1 > width {
            break;
        }
        used += w;
        out.push(ch);
    }
    out.push('…');
    out
}
