pub mod mailer;
pub mod mock_notifier;
