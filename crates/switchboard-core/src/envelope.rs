//! Message envelope formatting
//!
//! The agent sees every inbound message wrapped in a short header naming the
//! channel, chat kind, sender and time, so one remote agent can tell its
//! channels apart.

use crate::types::{InboundMessage, TriggerContext, TriggerType};

/// Text sent to the agent for an inbound chat message
pub fn format_message(msg: &InboundMessage) -> String {
    let kind = if msg.is_group {
        match &msg.group_name {
            Some(name) => format!("group \"{}\"", name),
            None => "group".to_string(),
        }
    } else {
        "dm".to_string()
    };
    let sender = match &msg.user_name {
        Some(name) => format!("{} ({})", name, msg.user_id),
        None => msg.user_id.clone(),
    };
    let mut out = format!(
        "[{}] [{}] {} at {}",
        msg.channel,
        kind,
        sender,
        msg.timestamp.format("%Y-%m-%d %H:%M UTC")
    );

    if let Some(reaction) = &msg.reaction {
        let verb = if reaction.removed { "removed" } else { "reacted" };
        out.push_str(&format!(
            "\n({} {} on message {})",
            verb, reaction.emoji, reaction.target_message_id
        ));
    }

    if !msg.text.is_empty() {
        out.push('\n');
        out.push_str(&msg.text);
    }

    for attachment in &msg.attachments {
        let location = attachment
            .local_path
            .as_deref()
            .or(attachment.url.as_deref())
            .unwrap_or("unavailable");
        let name = attachment.name.as_deref().unwrap_or("unnamed");
        out.push_str(&format!(
            "\n[attachment: {} {} -> {}]",
            attachment.kind, name, location
        ));
    }
    out
}

/// Text sent to the agent for a scheduled or external trigger
pub fn format_trigger(text: &str, trigger: &TriggerContext) -> String {
    if trigger.trigger_type == TriggerType::UserMessage {
        return text.to_string();
    }
    let mut header = format!("[trigger: {}", trigger.trigger_type);
    if let Some(job) = &trigger.job_name {
        header.push_str(&format!(" \"{}\"", job));
    }
    if let Some(channel) = &trigger.source_channel {
        header.push_str(&format!(" from {}", channel));
    }
    header.push(']');
    format!("{}\n{}", header, text)
}
