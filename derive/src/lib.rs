extern crate proc_macro;

use proc_macro::TokenStream;
use proc_macro2::TokenStream as TokenStream2;
use quote::quote;
use syn::{parse_macro_input, Attribute, Data, DeriveInput, Expr, Fields, Lit, Meta, Type};

/// Embedding of a field, as spelled in `#[condensed(embedding = "...")]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Embedding {
    Inline,
    Reference,
    ReferencePerType,
}

impl Embedding {
    fn parse(lit: &syn::LitStr) -> syn::Result<Self> {
        match lit.value().as_str() {
            "inline" => Ok(Embedding::Inline),
            "reference" => Ok(Embedding::Reference),
            "reference_per_type" => Ok(Embedding::ReferencePerType),
            other => Err(syn::Error::new(
                lit.span(),
                format!(
                    "Unknown embedding: {} (expected inline, reference or reference_per_type)",
                    other
                ),
            )),
        }
    }

    fn tokens(self) -> TokenStream2 {
        match self {
            Embedding::Inline => quote! { ::condensed_encoder::Embedding::Inline },
            Embedding::Reference => quote! { ::condensed_encoder::Embedding::Reference },
            Embedding::ReferencePerType => {
                quote! { ::condensed_encoder::Embedding::ReferencePerType }
            }
        }
    }
}

/// Attributes parsed from `#[condensed(...)]` on a struct or a field.
///
/// * `name` - The stream name (defaults to the Rust identifier)
/// * `description` - The description (defaults to the doc comment)
/// * `embedding` - Field only; `Option` fields default to `reference`, others to `inline`
/// * `skip` - Field only; not written, and filled with `Default::default()` on read
#[derive(Debug, Default)]
struct Attributes {
    name: Option<String>,
    description: Option<String>,
    embedding: Option<Embedding>,
    skip: bool,
}

fn parse_attributes(attrs: &[Attribute], allow_field_keys: bool) -> syn::Result<Attributes> {
    let mut parsed = Attributes::default();
    for attr in attrs {
        if !attr.path().is_ident("condensed") {
            continue;
        }
        attr.parse_args_with(|input: syn::parse::ParseStream| {
            while !input.is_empty() {
                let ident = input.parse::<syn::Ident>()?;
                if ident == "name" {
                    input.parse::<syn::Token![=]>()?;
                    parsed.name = Some(input.parse::<syn::LitStr>()?.value());
                } else if ident == "description" {
                    input.parse::<syn::Token![=]>()?;
                    parsed.description = Some(input.parse::<syn::LitStr>()?.value());
                } else if ident == "embedding" && allow_field_keys {
                    input.parse::<syn::Token![=]>()?;
                    parsed.embedding = Some(Embedding::parse(&input.parse::<syn::LitStr>()?)?);
                } else if ident == "skip" && allow_field_keys {
                    parsed.skip = true;
                } else {
                    return Err(syn::Error::new(
                        ident.span(),
                        format!("Unknown attribute: {}", ident),
                    ));
                }

                if input.peek(syn::Token![,]) {
                    input.parse::<syn::Token![,]>()?;
                }
            }
            Ok(())
        })?;
    }
    Ok(parsed)
}

/// Joins the lines of the doc comment, if any.
fn doc_comment(attrs: &[Attribute]) -> String {
    let lines: Vec<String> = attrs
        .iter()
        .filter(|attr| attr.path().is_ident("doc"))
        .filter_map(|attr| match &attr.meta {
            Meta::NameValue(nv) => match &nv.value {
                Expr::Lit(expr) => match &expr.lit {
                    Lit::Str(s) => Some(s.value().trim().to_string()),
                    _ => None,
                },
                _ => None,
            },
            _ => None,
        })
        .filter(|line| !line.is_empty())
        .collect();
    lines.join(" ")
}

/// Check if a type is `Option<T>`
fn is_option_type(ty: &Type) -> bool {
    if let Type::Path(type_path) = ty {
        type_path
            .path
            .segments
            .last()
            .map_or(false, |seg| seg.ident == "Option")
    } else {
        false
    }
}

/// Derive macro for implementing the `Condensed` trait
///
/// Maps a struct with named fields onto a struct type whose fields are written in declaration
/// order. Field types must implement `Condensed` themselves.
///
/// # Supported Attributes
///
/// * `#[condensed(name = "...", description = "...")]` - On the struct or a field
/// * `#[condensed(embedding = "inline" | "reference" | "reference_per_type")]` - On a field
/// * `#[condensed(skip)]` - On a field whose type implements `Default`
///
/// # Examples
///
/// ```rust,ignore
/// #[derive(Condensed)]
/// struct StackFrame {
///     method: String,
///     line: i32,
///     #[condensed(embedding = "reference")]
///     caller: Option<Box<StackFrame>>,
/// }
/// ```
#[proc_macro_derive(Condensed, attributes(condensed))]
pub fn derive_condensed(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match expand(&input) {
        Ok(tokens) => tokens.into(),
        Err(e) => e.to_compile_error().into(),
    }
}

fn expand(input: &DeriveInput) -> syn::Result<TokenStream2> {
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();

    let fields = match &input.data {
        Data::Struct(s) => match &s.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    ident,
                    "Condensed can only be derived for structs with named fields",
                ))
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                ident,
                "Condensed can only be derived for structs",
            ))
        }
    };

    let type_attrs = parse_attributes(&input.attrs, false)?;
    let type_name = type_attrs.name.unwrap_or_else(|| ident.to_string());
    let type_description = type_attrs
        .description
        .unwrap_or_else(|| doc_comment(&input.attrs));

    let mut field_defs = Vec::new();
    let mut field_values = Vec::new();
    let mut field_reads = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for f in fields {
        let Some(field_ident) = f.ident.as_ref() else {
            continue;
        };
        let ty = &f.ty;
        let attrs = parse_attributes(&f.attrs, true)?;

        if attrs.skip {
            field_reads.push(quote! {
                #field_ident: ::core::default::Default::default()
            });
            continue;
        }

        let field_name = attrs.name.unwrap_or_else(|| field_ident.to_string());
        if !seen.insert(field_name.clone()) {
            return Err(syn::Error::new_spanned(
                field_ident,
                format!("Field name {} is used twice in {}", field_name, type_name),
            ));
        }
        let description = attrs.description.unwrap_or_else(|| doc_comment(&f.attrs));
        let embedding = attrs
            .embedding
            .unwrap_or(if is_option_type(ty) {
                Embedding::Reference
            } else {
                Embedding::Inline
            })
            .tokens();

        field_defs.push(quote! {
            ::condensed_encoder::Field::new(
                #field_name,
                #description,
                <#ty as ::condensed_encoder::Condensed>::define(&mut *sink, &mut *graph)?,
                #embedding,
            )
        });
        field_values.push(quote! {
            (#field_name, ::condensed_encoder::Condensed::to_value(&self.#field_ident))
        });
        field_reads.push(quote! {
            #field_ident: <#ty as ::condensed_encoder::Condensed>::from_value(
                &::condensed_encoder::host::field_value(record, #field_name),
            )?
        });
    }

    Ok(quote! {
        impl #impl_generics ::condensed_encoder::Condensed for #ident #ty_generics #where_clause {
            fn type_name() -> ::std::string::String {
                ::std::string::String::from(#type_name)
            }

            fn define(
                sink: &mut dyn ::condensed_encoder::TypeSink,
                graph: &mut ::condensed_encoder::TypeGraph<::std::any::TypeId>,
            ) -> ::condensed_encoder::Result<::condensed_encoder::TypeRef> {
                graph.define(sink, ::std::any::TypeId::of::<Self>(), #type_name, |sink, graph, id| {
                    let fields = ::std::vec![#(#field_defs),*];
                    ::core::result::Result::Ok(::condensed_encoder::CondensedType::new(
                        id,
                        #type_name,
                        #type_description,
                        ::condensed_encoder::TypeKind::Struct(
                            ::condensed_encoder::StructSpec::new(fields)?,
                        ),
                    ))
                })
            }

            fn to_value(&self) -> ::condensed_encoder::Value {
                let fields: ::std::vec::Vec<(&str, ::condensed_encoder::Value)> =
                    ::std::vec![#(#field_values),*];
                ::condensed_encoder::Value::record(#type_name, fields)
            }

            fn from_value(value: &::condensed_encoder::Value) -> ::condensed_encoder::Result<Self> {
                let record = value.as_struct().ok_or_else(|| {
                    ::condensed_encoder::CondensedError::TypeMismatch {
                        expected: ::std::string::String::from(#type_name),
                        found: value.kind_name(),
                    }
                })?;
                ::core::result::Result::Ok(Self {
                    #(#field_reads),*
                })
            }
        }
    })
}
