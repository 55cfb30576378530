//! Combining the observed state of several stores.
//!
//! Each `aggregateN` takes the [`watch::Receiver`]s returned by
//! [`Store::observe`](crate::Store::observe) and a mapping function, and
//! returns a receiver holding `map(&s1, &s2, ...)`, recomputed whenever any
//! input changes. The background task stops once every input store is gone
//! or the returned receiver is dropped.
//!
//! ```ignore
//! let summary = aggregate2(roster.observe(), editor.observe(), |roster, editor| {
//!     Summary {
//!         footballers: roster.footballers.value().map_or(0, Vec::len),
//!         saving: editor.saved.is_loading(),
//!     }
//! });
//! ```

use futures::StreamExt;
use futures::stream::{BoxStream, select_all};
use tokio::sync::watch;

fn changes<S>(mut receiver: watch::Receiver<S>) -> BoxStream<'static, ()>
where
    S: Send + Sync + 'static,
{
    receiver.mark_unchanged();
    futures::stream::unfold(receiver, |mut receiver| async move {
        receiver.changed().await.ok().map(|()| ((), receiver))
    })
    .boxed()
}

macro_rules! aggregate_arity {
    ($(#[$doc:meta])* $name:ident => $($input:ident: $S:ident),+) => {
        $(#[$doc])*
        pub fn $name<$($S,)+ T, M>($($input: watch::Receiver<$S>,)+ map: M) -> watch::Receiver<T>
        where
            $($S: Send + Sync + 'static,)+
            T: Send + Sync + 'static,
            M: Fn($(&$S),+) -> T + Send + 'static,
        {
            let initial = map($(&*$input.borrow()),+);
            let (sender, receiver) = watch::channel(initial);
            let mut updates = select_all(vec![$(changes($input.clone())),+]);

            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        () = sender.closed() => break,
                        update = updates.next() => {
                            if update.is_none() {
                                break;
                            }
                            let value = map($(&*$input.borrow()),+);
                            sender.send_replace(value);
                        }
                    }
                }
                tracing::trace!(aggregate = stringify!($name), "Aggregation finished");
            });

            receiver
        }
    };
}

aggregate_arity!(
    /// Combine the observed state of two stores
    aggregate2 => first: S1, second: S2
);
aggregate_arity!(
    /// Combine the observed state of three stores
    aggregate3 => first: S1, second: S2, third: S3
);
aggregate_arity!(
    /// Combine the observed state of four stores
    aggregate4 => first: S1, second: S2, third: S3, fourth: S4
);
aggregate_arity!(
    /// Combine the observed state of five stores
    aggregate5 => first: S1, second: S2, third: S3, fourth: S4, fifth: S5
);
aggregate_arity!(
    /// Combine the observed state of six stores
    aggregate6 => first: S1, second: S2, third: S3, fourth: S4, fifth: S5, sixth: S6
);
