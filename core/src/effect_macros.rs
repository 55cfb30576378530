//! Declarative macros for ergonomic effect construction

/// Create an `Effect::Future` from an async block
///
/// # Example
///
/// ```rust,ignore
/// use composable_store_core::async_effect;
///
/// async_effect! {
///     let roster = api.footballers().await.ok()?;
///     Some(RosterAction::Counted { total: roster.len() })
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}

/// Create an `Effect::Delay` for scheduling delayed actions
///
/// # Example
///
/// ```rust,ignore
/// use composable_store_core::delay;
/// use std::time::Duration;
///
/// delay! {
///     duration: Duration::from_secs(30),
///     action: RosterAction::RefreshExpired
/// }
/// ```
#[macro_export]
macro_rules! delay {
    (
        duration: $duration:expr,
        action: $action:expr
    ) => {
        $crate::effect::Effect::Delay {
            duration: $duration,
            action: ::std::boxed::Box::new($action),
        }
    };
}

/// Create an `Effect::load` for a field of state
///
/// # Example
///
/// ```rust,ignore
/// use composable_store_core::load;
///
/// load! {
///     slot: RosterState.footballers,
///     work: |env: RosterEnvironment| async move { env.api.footballers().await }
/// }
/// ```
#[macro_export]
macro_rules! load {
    (
        slot: $state:ident . $field:ident,
        work: $work:expr
    ) => {
        $crate::effect::Effect::load($crate::slot!($state, $field), $work)
    };
}
