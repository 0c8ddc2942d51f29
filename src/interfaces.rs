/// Native interfaces known to the built-in realm and registry.
///
/// The variants form a single-inheritance tree through [`DomInterface::parent`];
/// [`DomInterface::ALL`] lists every variant after its parent so tables can be
/// built in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomInterface {
    EventTarget,
    Window,
    Node,
    Document,
    HtmlDocument,
    DocumentFragment,
    CharacterData,
    Text,
    Comment,
    Element,
    HtmlElement,
    HtmlAnchorElement,
    HtmlBodyElement,
    HtmlButtonElement,
    HtmlDivElement,
    HtmlFormElement,
    HtmlImageElement,
    HtmlInputElement,
    HtmlParagraphElement,
    HtmlSpanElement,
    HtmlUnknownElement,
    SvgElement,
    Event,
    UiEvent,
    FocusEvent,
    KeyboardEvent,
    MouseEvent,
    PointerEvent,
    CustomEvent,
    AnimationEvent,
    TransitionEvent,
}

impl DomInterface {
    pub const ALL: [DomInterface; 31] = [
        Self::EventTarget,
        Self::Window,
        Self::Node,
        Self::Document,
        Self::HtmlDocument,
        Self::DocumentFragment,
        Self::CharacterData,
        Self::Text,
        Self::Comment,
        Self::Element,
        Self::HtmlElement,
        Self::HtmlAnchorElement,
        Self::HtmlBodyElement,
        Self::HtmlButtonElement,
        Self::HtmlDivElement,
        Self::HtmlFormElement,
        Self::HtmlImageElement,
        Self::HtmlInputElement,
        Self::HtmlParagraphElement,
        Self::HtmlSpanElement,
        Self::HtmlUnknownElement,
        Self::SvgElement,
        Self::Event,
        Self::UiEvent,
        Self::FocusEvent,
        Self::KeyboardEvent,
        Self::MouseEvent,
        Self::PointerEvent,
        Self::CustomEvent,
        Self::AnimationEvent,
        Self::TransitionEvent,
    ];

    /// Constructor name as the host reports it.
    pub fn name(self) -> &'static str {
        match self {
            Self::EventTarget => "EventTarget",
            Self::Window => "Window",
            Self::Node => "Node",
            Self::Document => "Document",
            Self::HtmlDocument => "HTMLDocument",
            Self::DocumentFragment => "DocumentFragment",
            Self::CharacterData => "CharacterData",
            Self::Text => "Text",
            Self::Comment => "Comment",
            Self::Element => "Element",
            Self::HtmlElement => "HTMLElement",
            Self::HtmlAnchorElement => "HTMLAnchorElement",
            Self::HtmlBodyElement => "HTMLBodyElement",
            Self::HtmlButtonElement => "HTMLButtonElement",
            Self::HtmlDivElement => "HTMLDivElement",
            Self::HtmlFormElement => "HTMLFormElement",
            Self::HtmlImageElement => "HTMLImageElement",
            Self::HtmlInputElement => "HTMLInputElement",
            Self::HtmlParagraphElement => "HTMLParagraphElement",
            Self::HtmlSpanElement => "HTMLSpanElement",
            Self::HtmlUnknownElement => "HTMLUnknownElement",
            Self::SvgElement => "SVGElement",
            Self::Event => "Event",
            Self::UiEvent => "UIEvent",
            Self::FocusEvent => "FocusEvent",
            Self::KeyboardEvent => "KeyboardEvent",
            Self::MouseEvent => "MouseEvent",
            Self::PointerEvent => "PointerEvent",
            Self::CustomEvent => "CustomEvent",
            Self::AnimationEvent => "AnimationEvent",
            Self::TransitionEvent => "TransitionEvent",
        }
    }

    pub fn parent(self) -> Option<DomInterface> {
        let parent = match self {
            Self::EventTarget | Self::Event => return None,
            Self::Window | Self::Node => Self::EventTarget,
            Self::Document | Self::DocumentFragment | Self::CharacterData | Self::Element => {
                Self::Node
            }
            Self::HtmlDocument => Self::Document,
            Self::Text | Self::Comment => Self::CharacterData,
            Self::HtmlElement | Self::SvgElement => Self::Element,
            Self::HtmlAnchorElement
            | Self::HtmlBodyElement
            | Self::HtmlButtonElement
            | Self::HtmlDivElement
            | Self::HtmlFormElement
            | Self::HtmlImageElement
            | Self::HtmlInputElement
            | Self::HtmlParagraphElement
            | Self::HtmlSpanElement
            | Self::HtmlUnknownElement => Self::HtmlElement,
            Self::UiEvent | Self::CustomEvent | Self::AnimationEvent | Self::TransitionEvent => {
                Self::Event
            }
            Self::FocusEvent | Self::KeyboardEvent | Self::MouseEvent => Self::UiEvent,
            Self::PointerEvent => Self::MouseEvent,
        };
        Some(parent)
    }

    pub fn from_name(name: &str) -> Option<DomInterface> {
        Self::ALL.into_iter().find(|interface| interface.name() == name)
    }

    /// Interface the host uses for an HTML element with the given tag.
    pub fn for_tag(tag: &str) -> DomInterface {
        match tag.to_ascii_lowercase().as_str() {
            "a" => Self::HtmlAnchorElement,
            "body" => Self::HtmlBodyElement,
            "button" => Self::HtmlButtonElement,
            "div" => Self::HtmlDivElement,
            "form" => Self::HtmlFormElement,
            "img" => Self::HtmlImageElement,
            "input" => Self::HtmlInputElement,
            "p" => Self::HtmlParagraphElement,
            "span" => Self::HtmlSpanElement,
            "svg" => Self::SvgElement,
            "article" | "aside" | "footer" | "header" | "main" | "nav" | "section" => {
                Self::HtmlElement
            }
            _ => Self::HtmlUnknownElement,
        }
    }

    /// Ancestors of this interface, nearest first, excluding itself.
    pub fn ancestors(self) -> impl Iterator<Item = DomInterface> {
        std::iter::successors(self.parent(), |interface| interface.parent())
    }
}
