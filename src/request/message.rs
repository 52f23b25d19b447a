//! Message and content types carried on a [`super::Request`].

use serde::{ Deserialize, Serialize };
use serde_json::Value;

/// Role of a message in a conversation.
#[ derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize ) ]
#[ serde( rename_all = "lowercase" ) ]
pub enum Role
{
  /// A system/instruction message.
  System,
  /// A user-authored message.
  User,
  /// A model-authored message.
  Assistant,
  /// The result of a tool invocation, fed back to the model.
  Tool,
}

/// One part of a (possibly multi-part) message content.
#[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
#[ serde( tag = "type", rename_all = "snake_case" ) ]
pub enum ContentPart
{
  /// Plain text.
  Text
  {
    /// The text.
    text : String,
  },
  /// An image, referenced by URL or inlined as base64.
  Image
  {
    /// `data:` URI, `https://` URL, or raw base64 payload.
    source : String,
    /// MIME type, when `source` is raw base64 rather than a `data:` URI.
    #[ serde( skip_serializing_if = "Option::is_none" ) ]
    media_type : Option< String >,
  },
  /// An audio clip, referenced the same way as [`ContentPart::Image`].
  Audio
  {
    /// `data:` URI, `https://` URL, or raw base64 payload.
    source : String,
    /// MIME type, when `source` is raw base64 rather than a `data:` URI.
    #[ serde( skip_serializing_if = "Option::is_none" ) ]
    media_type : Option< String >,
  },
  /// A model-emitted request to invoke a tool.
  ToolCall
  {
    /// Correlates this call with its eventual [`ContentPart::ToolResult`].
    id : String,
    /// Tool name.
    name : String,
    /// Tool arguments, as the provider serialized them.
    arguments : Value,
  },
  /// The result of executing a tool call.
  ToolResult
  {
    /// The [`ContentPart::ToolCall::id`] this result answers.
    tool_call_id : String,
    /// Result payload, provider-agnostic text or JSON.
    content : Value,
    /// Whether the tool invocation itself failed.
    #[ serde( skip_serializing_if = "Option::is_none" ) ]
    is_error : Option< bool >,
  },
}

impl ContentPart
{
  /// Shorthand for a text part.
  #[ must_use ]
  pub fn text( text : impl Into< String > ) -> Self
  {
    ContentPart::Text { text : text.into() }
  }
}

/// A message's content : either a bare string or an ordered sequence of
/// typed parts.
#[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
#[ serde( untagged ) ]
pub enum Content
{
  /// A plain-text message body.
  Text( String ),
  /// A multi-part message body (text interleaved with images, tool calls, ...).
  Parts( Vec< ContentPart > ),
}

impl Content
{
  /// Whether this content carries no text and no parts.
  #[ must_use ]
  pub fn is_empty( &self ) -> bool
  {
    match self
    {
      Content::Text( text ) => text.is_empty(),
      Content::Parts( parts ) => parts.is_empty(),
    }
  }

  /// Best-effort byte length, used by context-management token estimators.
  #[ must_use ]
  pub fn byte_len( &self ) -> usize
  {
    match self
    {
      Content::Text( text ) => text.len(),
      Content::Parts( parts ) => parts.iter().map( | part |
      {
        match part
        {
          ContentPart::Text { text } => text.len(),
          ContentPart::Image { source, .. } | ContentPart::Audio { source, .. } => source.len(),
          ContentPart::ToolCall { arguments, .. } => arguments.to_string().len(),
          ContentPart::ToolResult { content, .. } => content.to_string().len(),
        }
      } ).sum(),
    }
  }
}

impl From< &str > for Content
{
  fn from( value : &str ) -> Self
  {
    Content::Text( value.to_string() )
  }
}

impl From< String > for Content
{
  fn from( value : String ) -> Self
  {
    Content::Text( value )
  }
}

/// One turn in a conversation.
#[ derive( Debug, Clone, PartialEq, Serialize, Deserialize ) ]
pub struct Message
{
  /// Who authored this message.
  pub role : Role,
  /// What it says.
  pub content : Content,
}

impl Message
{
  /// Construct a message from a role and anything convertible to [`Content`].
  #[ must_use ]
  pub fn new( role : Role, content : impl Into< Content > ) -> Self
  {
    Self { role, content }
  }

  /// Shorthand for a user text message.
  #[ must_use ]
  pub fn user( text : impl Into< String > ) -> Self
  {
    Self::new( Role::User, text.into() )
  }

  /// Shorthand for an assistant text message.
  #[ must_use ]
  pub fn assistant( text : impl Into< String > ) -> Self
  {
    Self::new( Role::Assistant, text.into() )
  }

  /// Shorthand for a system text message.
  #[ must_use ]
  pub fn system( text : impl Into< String > ) -> Self
  {
    Self::new( Role::System, text.into() )
  }

  /// Validate message shape : non-empty content for every role except a
  /// tool result (which may legitimately be an empty string).
  #[ must_use ]
  pub fn is_well_formed( &self ) -> bool
  {
    !self.content.is_empty() || matches!( self.role, Role::Tool )
  }
}
