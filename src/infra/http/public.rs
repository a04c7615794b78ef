use std::str::FromStr;

use axum::{
    Json,
    extract::{Path, Query, State, rejection::QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use tracing::debug;

use crate::{
    application::error::HttpError,
    domain::blog::{BlogQuery, BlogSort},
};

use super::HttpState;

const SOURCE: &str = "infra::http::public";

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(super) struct ListParams {
    limit: Option<u32>,
    page: Option<u32>,
    sort: Option<String>,
}

impl ListParams {
    fn into_query(self) -> Result<BlogQuery, HttpError> {
        let sort = match self.sort.as_deref().map(str::trim) {
            None | Some("") => BlogSort::default(),
            Some(value) => BlogSort::from_str(value).map_err(|err| {
                HttpError::from_error(SOURCE, StatusCode::BAD_REQUEST, "Invalid sort", &err)
            })?,
        };
        Ok(BlogQuery::new(self.limit, self.page, sort))
    }
}

pub(super) async fn list_content(
    State(state): State<HttpState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Response {
    let query = match params {
        Ok(Query(params)) => params.into_query(),
        Err(rejection) => Err(HttpError::from_error(
            SOURCE,
            StatusCode::BAD_REQUEST,
            "Invalid query",
            &rejection,
        )),
    };
    let query = match query {
        Ok(query) => query,
        Err(err) => return err.into_response(),
    };

    match state.content.list(query).await {
        Ok((page, outcome)) => {
            debug!(
                target = "cachet::http::public",
                query = %query.canonical(),
                outcome = outcome.as_str(),
                "Listing served"
            );
            Json(page).into_response()
        }
        Err(err) => HttpError::from(err).into_response(),
    }
}

pub(super) async fn content_detail(
    State(state): State<HttpState>,
    Path(slug): Path<String>,
) -> Response {
    match state.content.find_by_slug(&slug).await {
        Ok((blog, outcome)) => {
            debug!(
                target = "cachet::http::public",
                slug = %slug,
                outcome = outcome.as_str(),
                "Blog served"
            );
            Json(blog).into_response()
        }
        Err(err) => HttpError::from(err).into_response(),
    }
}
