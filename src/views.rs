// printable label sheet, one card per item code
use std::sync::Arc;

use axum::extract::State;
use maud::{html, Markup, PreEscaped, DOCTYPE};

use crate::{
	auth::Admin,
	error::AppError,
	extract::QueryArgs,
	items,
	state::State as AppState,
	types::{Item, ItemFilter},
};

const STYLE: &str = r#"
body { font-family: sans-serif; margin: 1cm; }
.sheet { display: flex; flex-wrap: wrap; gap: 0.5cm; }
.label { border: 1px dashed #888; width: 6cm; padding: 0.3cm; page-break-inside: avoid; }
.code { font-family: monospace; font-size: 1.4em; font-weight: bold; }
.meta { color: #555; font-size: 0.8em; }
"#;

pub async fn labels(
	Admin(_): Admin,
	State(state): State<Arc<AppState>>,
	QueryArgs(filter): QueryArgs<ItemFilter>,
) -> Result<Markup, AppError> {
	let items = items::list(&state.db, &filter).await?;
	Ok(label_sheet(&items))
}

pub fn label_sheet(items: &[Item]) -> Markup {
	html! {
		(DOCTYPE)
		html {
			head {
				meta charset="utf-8";
				title { "Item labels" }
				style { (PreEscaped(STYLE)) }
			}
			body {
				@if items.is_empty() {
					p { "No items to label." }
				} @else {
					div class="sheet" {
						@for item in items {
							div class="label" {
								div class="code" { (item.code) }
								div { (item.name) }
								div class="meta" { (item.category) " · #" (item.id) }
							}
						}
					}
				}
			}
		}
	}
}
