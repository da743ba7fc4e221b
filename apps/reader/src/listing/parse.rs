//! Extracts candidates from the daily papers HTML page.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use crate::models::listing::{arxiv_pdf_link, Candidate, Listing};

const SITE_ROOT: &str = "https://huggingface.co";

static TIME: Lazy<Selector> = Lazy::new(|| selector("time[datetime]"));
static ARTICLE: Lazy<Selector> = Lazy::new(|| selector("article"));
static TITLE_LINK: Lazy<Selector> = Lazy::new(|| selector("h3 a[href]"));
static AUTHOR: Lazy<Selector> = Lazy::new(|| selector("li.text-gray-600"));
static ABSTRACT: Lazy<Selector> = Lazy::new(|| selector("p.line-clamp-3"));
static UPVOTES: Lazy<Selector> = Lazy::new(|| selector("div.leading-none"));
static COMMENTS: Lazy<Selector> = Lazy::new(|| selector(r##"a[href*="#community"]"##));

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid css selector")
}

/// Parses the listing page. The date comes from the first `<time>` element,
/// falling back to `today`. Articles without a title link are skipped.
pub fn parse_listing(html: &str, today: NaiveDate) -> Listing {
    let document = Html::parse_document(html);

    let date = document
        .select(&TIME)
        .next()
        .and_then(|t| t.value().attr("datetime"))
        .and_then(|dt| dt.split('T').next())
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| today.format("%Y-%m-%d").to_string());

    let papers = document.select(&ARTICLE).filter_map(parse_article).collect();

    Listing { date, papers }
}

fn parse_article(article: ElementRef<'_>) -> Option<Candidate> {
    let anchor = article.select(&TITLE_LINK).next()?;
    let href = anchor.value().attr("href")?;
    let title = element_text(anchor);

    let link = if href.starts_with("http") {
        href.to_string()
    } else {
        format!("{SITE_ROOT}{href}")
    };
    let id = href
        .split(['?', '#'])
        .next()
        .unwrap_or(href)
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())?
        .to_string();

    let authors = article
        .select(&AUTHOR)
        .map(element_text)
        .filter(|a| !a.is_empty())
        .collect();
    let published_at = article
        .select(&TIME)
        .next()
        .and_then(|t| t.value().attr("datetime"))
        .map(str::to_string);
    let summary_hint = article
        .select(&ABSTRACT)
        .next()
        .map(element_text)
        .filter(|s| !s.is_empty());

    Some(Candidate {
        pdf_link: arxiv_pdf_link(&id),
        id,
        title,
        link,
        summary_hint,
        authors,
        published_at,
        upvotes: first_count(article, &UPVOTES),
        comments: first_count(article, &COMMENTS),
    })
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_count(article: ElementRef<'_>, selector: &Selector) -> u32 {
    article
        .select(selector)
        .next()
        .and_then(|e| element_text(e).parse().ok())
        .unwrap_or(0)
}
