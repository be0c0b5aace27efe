//! Control-surface commands for the persisted app config.

use crate::{
    error::{BagError, CommandError},
    settings::AppConfig,
    AppState,
};

pub async fn get_config(state: &AppState) -> Result<AppConfig, CommandError> {
    Ok(state.settings.load())
}

pub async fn set_user(state: &AppState, user: String) -> Result<AppConfig, CommandError> {
    let user = user.trim();
    if user.is_empty() {
        return Err(BagError::InvalidArgument("user must not be empty".into()).into());
    }
    Ok(state.settings.set_last_user(user)?)
}
