use std::{
    collections::BTreeMap,
    sync::{Arc, PoisonError, RwLock},
};

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    handler::Handler,
    http::{HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::cache::{
    ActionDescriptor, CachePolicy, ControllerDescriptor, EndpointPolicy, InvalidationRule,
    OutputCache, PER_USER_KEY_GENERATOR, ParameterDescriptor, TypeRef,
    invalidation_layer, output_cache_layer,
};

use super::middleware::{CurrentUser, log_responses, resolve_principal};

const CONTROLLER: &str = "Teams";
const TEAM_TYPE: &str = "Team";
const VERSION_HEADER: &str = "x-roster-version";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    pub id: u32,
    pub name: String,
    pub owner: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TeamInput {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchQuery {
    name: Option<String>,
}

#[derive(Debug, Default)]
struct Roster {
    next_id: u32,
    version: u64,
    teams: BTreeMap<u32, Team>,
}

impl Roster {
    fn insert(&mut self, name: String, owner: Option<String>) -> Team {
        self.next_id += 1;
        self.version += 1;
        let team = Team {
            id: self.next_id,
            name,
            owner,
        };
        self.teams.insert(team.id, team.clone());
        team
    }
}

/// In-memory team roster shared by the handlers.
#[derive(Clone, Default)]
pub struct TeamsState {
    roster: Arc<RwLock<Roster>>,
}

impl TeamsState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Roster pre-filled with `names`, ids assigned in order from 1.
    pub fn seeded<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let state = Self::new();
        {
            let mut roster = state.write();
            for name in names {
                roster.insert(name.into(), None);
            }
        }
        state
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Roster> {
        self.roster.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Roster> {
        self.roster.write().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Static description of the demo controller's actions.
pub fn teams_controller() -> ControllerDescriptor {
    let team = || TypeRef::Single(TEAM_TYPE.to_string());
    let teams = || TypeRef::Collection(TEAM_TYPE.to_string());

    ControllerDescriptor::new(CONTROLLER)
        .with_action(ActionDescriptor::new("Get").returning(teams()))
        .with_action(
            ActionDescriptor::new("GetById")
                .with_parameter(ParameterDescriptor::path("id", "u32"))
                .returning(team()),
        )
        .with_action(
            ActionDescriptor::new("Search")
                .http_get()
                .with_parameter(ParameterDescriptor::query("name", "String"))
                .returning(teams()),
        )
        .with_action(ActionDescriptor::new("GetMine").returning(teams()))
        .with_action(
            ActionDescriptor::new("Post")
                .with_parameter(ParameterDescriptor::body("team", TEAM_TYPE)),
        )
        .with_action(
            ActionDescriptor::new("Put")
                .with_parameter(ParameterDescriptor::path("id", "u32"))
                .with_parameter(ParameterDescriptor::body("team", TEAM_TYPE)),
        )
        .with_action(
            ActionDescriptor::new("Delete").with_parameter(ParameterDescriptor::path("id", "u32")),
        )
}

pub fn build_router(cache: &OutputCache, state: TeamsState) -> Router {
    let controller = teams_controller();

    let list = cache.endpoint(
        &controller,
        "Get",
        EndpointPolicy::new(CachePolicy::fixed(100, 100)),
    );
    let by_id = cache.endpoint(
        &controller,
        "GetById",
        EndpointPolicy::new(CachePolicy::fixed(60, 60))
            .with_must_revalidate()
            .with_custom_headers([VERSION_HEADER]),
    );
    let search = cache.endpoint(
        &controller,
        "Search",
        EndpointPolicy::new(CachePolicy::fixed(30, 30)),
    );
    let mine = cache.endpoint(
        &controller,
        "GetMine",
        EndpointPolicy::new(CachePolicy::fixed(30, 30))
            .with_key_generator(PER_USER_KEY_GENERATOR)
            .with_private(),
    );

    let create = cache.invalidation(&controller, "Post", vec![InvalidationRule::auto()]);
    let update = cache.invalidation(
        &controller,
        "Put",
        vec![InvalidationRule::auto_matching_types()],
    );
    let delete = cache.invalidation(&controller, "Delete", vec![InvalidationRule::auto()]);

    Router::new()
        .route(
            "/teams",
            get(list_teams.layer(middleware::from_fn_with_state(list, output_cache_layer))).post(
                create_team.layer(middleware::from_fn_with_state(create, invalidation_layer)),
            ),
        )
        .route(
            "/teams/search",
            get(search_teams.layer(middleware::from_fn_with_state(search, output_cache_layer))),
        )
        .route(
            "/teams/mine",
            get(my_teams.layer(middleware::from_fn_with_state(mine, output_cache_layer))),
        )
        .route(
            "/teams/{id}",
            get(get_team.layer(middleware::from_fn_with_state(by_id, output_cache_layer)))
                .put(update_team.layer(middleware::from_fn_with_state(update, invalidation_layer)))
                .delete(
                    delete_team.layer(middleware::from_fn_with_state(delete, invalidation_layer)),
                ),
        )
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(resolve_principal))
}

async fn list_teams(State(state): State<TeamsState>) -> Json<Vec<Team>> {
    Json(state.read().teams.values().cloned().collect())
}

async fn get_team(State(state): State<TeamsState>, Path(id): Path<u32>) -> Response {
    let roster = state.read();
    match roster.teams.get(&id) {
        Some(team) => {
            let mut response = Json(team.clone()).into_response();
            response
                .headers_mut()
                .insert(VERSION_HEADER, HeaderValue::from(roster.version));
            response
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn search_teams(
    State(state): State<TeamsState>,
    Query(query): Query<SearchQuery>,
) -> Json<Vec<Team>> {
    let needle = query.name.unwrap_or_default().to_lowercase();
    Json(
        state
            .read()
            .teams
            .values()
            .filter(|team| team.name.to_lowercase().contains(&needle))
            .cloned()
            .collect(),
    )
}

async fn my_teams(
    State(state): State<TeamsState>,
    CurrentUser(principal): CurrentUser,
) -> Response {
    let Some(principal) = principal else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let teams: Vec<Team> = state
        .read()
        .teams
        .values()
        .filter(|team| team.owner.as_deref() == Some(principal.name.as_str()))
        .cloned()
        .collect();
    Json(teams).into_response()
}

async fn create_team(
    State(state): State<TeamsState>,
    CurrentUser(principal): CurrentUser,
    Json(input): Json<TeamInput>,
) -> (StatusCode, Json<Team>) {
    let owner = principal.map(|principal| principal.name);
    let team = state.write().insert(input.name, owner);
    info!(team_id = team.id, "team created");
    (StatusCode::CREATED, Json(team))
}

async fn update_team(
    State(state): State<TeamsState>,
    Path(id): Path<u32>,
    Json(input): Json<TeamInput>,
) -> Result<Json<Team>, StatusCode> {
    let mut roster = state.write();
    let team = roster.teams.get_mut(&id).ok_or(StatusCode::NOT_FOUND)?;
    team.name = input.name;
    let team = team.clone();
    roster.version += 1;
    Ok(Json(team))
}

async fn delete_team(State(state): State<TeamsState>, Path(id): Path<u32>) -> StatusCode {
    let mut roster = state.write();
    if roster.teams.remove(&id).is_none() {
        return StatusCode::NOT_FOUND;
    }
    roster.version += 1;
    StatusCode::NO_CONTENT
}
