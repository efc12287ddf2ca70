pub(crate) mod notifier;
