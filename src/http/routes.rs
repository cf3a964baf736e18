//! Gallery application routes served behind the pipeline.
//!
//! These handlers are the protected application: user login, artwork
//! listing and creation, and search. They see requests only after every
//! security stage has run, so string input is already sanitized.

use std::sync::{Arc, Mutex};

use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::session::Session;

#[derive(Debug, Clone, Serialize)]
pub struct Artwork {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub artist: String,
}

#[derive(Debug, Deserialize)]
pub struct NewArtwork {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub artist: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Default)]
pub struct Gallery {
    artworks: Mutex<Vec<Artwork>>,
}

impl Gallery {
    fn list(&self) -> Vec<Artwork> {
        self.artworks.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn add(&self, new: NewArtwork) -> Artwork {
        let mut artworks = self.artworks.lock().unwrap_or_else(|p| p.into_inner());
        let artwork = Artwork {
            id: artworks.len() as u64 + 1,
            title: new.title,
            description: new.description,
            artist: new.artist,
        };
        artworks.push(artwork.clone());
        artwork
    }

    fn find(&self, id: u64) -> Option<Artwork> {
        self.artworks
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|a| a.id == id)
            .cloned()
    }
}

pub fn gallery_router() -> Router {
    Router::new()
        .route("/", get(index))
        .route("/user/login", post(login))
        .route("/artworks", get(list_artworks).post(create_artwork))
        .route("/artworks/{id}", get(get_artwork))
        .route("/search", get(search))
        .with_state(Arc::new(Gallery::default()))
}

async fn index(Extension(session): Extension<Session>) -> Json<Value> {
    Json(json!({
        "name": "gallery",
        "flash": session.take_flash(),
    }))
}

async fn login(
    Extension(session): Extension<Session>,
    Json(form): Json<LoginForm>,
) -> AppResult<Json<Value>> {
    if form.username.trim().is_empty() || form.password.is_empty() {
        return Err(AppError::validation("Username and password are required").with_code("E_LOGIN_FIELDS"));
    }
    session.insert("user", form.username.clone());
    Ok(Json(json!({ "success": true, "username": form.username })))
}

async fn list_artworks(State(gallery): State<Arc<Gallery>>) -> Json<Vec<Artwork>> {
    Json(gallery.list())
}

async fn create_artwork(
    State(gallery): State<Arc<Gallery>>,
    Json(new): Json<NewArtwork>,
) -> AppResult<Json<Artwork>> {
    if new.title.trim().is_empty() {
        return Err(AppError::validation("Title is required").with_code("E_TITLE"));
    }
    Ok(Json(gallery.add(new)))
}

async fn get_artwork(State(gallery): State<Arc<Gallery>>, Path(id): Path<u64>) -> AppResult<Json<Artwork>> {
    gallery
        .find(id)
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("Artwork {} not found", id)))
}

async fn search(Query(query): Query<SearchQuery>) -> Json<Value> {
    Json(json!({ "query": query.q, "results": [] }))
}
