//! Locate elements worth probing.

use tracing::debug;

use crate::element::ElementRef;
use crate::session::{Locator, Session, SessionResult};

/// Elements a user can activate by pointer or keyboard
pub const ACTIVATABLE_SELECTOR: &str = "button, a[href], input[type=button], \
     input[type=submit], input[type=checkbox], select, [role=button], \
     [role=checkbox], [role=tab], [onclick], [tabindex]";

/// Visible activatable elements in document order, without duplicates
pub async fn find_candidates(session: &dyn Session) -> SessionResult<Vec<ElementRef>> {
    let handles = session.find_all(&Locator::css(ACTIVATABLE_SELECTOR)).await?;
    let elements = ElementRef::from_handles(session, handles).await?;
    let candidates = visible_unique(session, elements).await?;
    debug!("Found {} candidate elements", candidates.len());
    Ok(candidates)
}

/// Visible elements matching any of `selectors`; selectors matching nothing are skipped
pub async fn candidates_from_selectors(
    session: &dyn Session,
    selectors: &[String],
) -> SessionResult<Vec<ElementRef>> {
    let mut found = Vec::new();
    for selector in selectors {
        let handles = session.find_all(&Locator::css(selector.as_str())).await?;
        if handles.is_empty() {
            debug!("Selector {} matched nothing", selector);
        }
        found.extend(ElementRef::from_handles(session, handles).await?);
    }
    visible_unique(session, found).await
}

/// Drop duplicates and nodes that are hidden or gone by now
async fn visible_unique(
    session: &dyn Session,
    elements: Vec<ElementRef>,
) -> SessionResult<Vec<ElementRef>> {
    let mut unique: Vec<ElementRef> = Vec::with_capacity(elements.len());
    for element in elements {
        if element.was_visible() && !unique.contains(&element) {
            unique.push(element);
        }
    }
    ElementRef::safe_retain(&mut unique, |element| {
        let element = element.clone();
        async move { element.is_visible(session).await }
    })
    .await?;
    Ok(unique)
}
