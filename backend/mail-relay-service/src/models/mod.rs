pub mod conversation;
pub mod dto;
pub mod message;

pub use conversation::Conversation;
pub use dto::{
    AttachmentInput, InboundMailRequest, RecipientInput, SendMailRequest, TransitionRequest,
    UpdateMailRequest,
};
pub use message::{
    Attachment, DeliveryChannel, DeliveryStatus, Message, MessagePatch, MessagePriority,
    MessageStatus, MessageView, NewAttachment, NewMessage, NewRecipient, Recipient,
    RecipientType, StorageProvider,
};
