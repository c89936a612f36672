//! Prompt templates for the two answer paths.

use minijinja::{context, Environment};

use crate::constants;
use crate::search::SearchHit;

const PLAIN_TEMPLATE: &str = "plain.txt";
const SEARCH_TEMPLATE: &str = "search.txt";

// Persona shared by both templates.
const PERSONA: &str = "You are a friendly, casual chatbot focused on women's empowerment and feminism.

Your responses MUST be:
1. VERY SHORT - just 1-2 sentences
2. Casual and conversational like texting a friend
3. Helpful without being academic
4. Empowering and positive

DO NOT use formal language, citations, or academic tone.
DO NOT use bullet points or numbered lists.
NEVER provide long explanations or history lessons.
NO introductory phrases like \"In feminism...\" or \"When it comes to...\"

Just give a simple, direct answer as if texting a friend.";

const PLAIN_BODY: &str = "{{ persona }}

User question: {{ question }}

Helpful answer:";

const SEARCH_BODY: &str = "{{ persona }}

Here is some information that might help you answer: {{ search_result }}

Remember to keep your response to 1-2 sentences maximum.

User question: {{ question }}

Helpful answer:";

/// Renders the plain and search-augmented prompts.
pub struct PromptBuilder {
    env: Environment<'static>,
}

impl PromptBuilder {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        env.add_template(PLAIN_TEMPLATE, PLAIN_BODY)?;
        env.add_template(SEARCH_TEMPLATE, SEARCH_BODY)?;
        Ok(Self { env })
    }

    pub fn plain(&self, question: &str) -> Result<String, minijinja::Error> {
        self.env.get_template(PLAIN_TEMPLATE)?.render(context! {
            persona => PERSONA,
            question => question,
        })
    }

    pub fn with_search(&self, question: &str, search_result: &str) -> Result<String, minijinja::Error> {
        self.env.get_template(SEARCH_TEMPLATE)?.render(context! {
            persona => PERSONA,
            search_result => search_result,
            question => question,
        })
    }
}

/// Text injected as `search_result`: the first hit, cut to
/// [`constants::SEARCH_SNIPPET_CHARS`] characters.
pub fn search_context(hits: &[SearchHit]) -> String {
    match hits.first() {
        Some(hit) => truncate_chars(&hit.content, constants::SEARCH_SNIPPET_CHARS),
        None => constants::NO_SEARCH_RESULTS.to_string(),
    }
}

pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}
